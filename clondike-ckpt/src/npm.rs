use std::io::{Read, Write};

use clondike_wire::{ClondikeError, Result};

use crate::header::{read_bytes, read_u32};

/// Non-preemptive migration params: argc, envc, filename, and argv/envp
/// packed as consecutive NUL-terminated strings behind one length-prefixed
/// blob (spec. §4.1 step 11, supplemented from the original's single
/// contiguous `args_size` buffer rather than one length prefix per string).
#[derive(Debug, Clone)]
pub struct NpmParams {
    pub filename: String,
    pub argv: Vec<String>,
    pub envp: Vec<String>,
}

impl NpmParams {
    fn pack_data(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for s in self.argv.iter().chain(self.envp.iter()) {
            data.extend_from_slice(s.as_bytes());
            data.push(0);
        }
        data
    }

    fn unpack_data(data: &[u8], argc: usize, envc: usize) -> Result<(Vec<String>, Vec<String>)> {
        let mut strings = data
            .split(|&b| b == 0)
            .map(|chunk| {
                String::from_utf8(chunk.to_vec()).map_err(|e| ClondikeError::InvalidMessage(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        // `split` on a NUL-terminated buffer yields one trailing empty
        // string; drop it if the count matches.
        if strings.len() == argc + envc + 1 && strings.last().map(|s| s.is_empty()).unwrap_or(false) {
            strings.pop();
        }

        if strings.len() != argc + envc {
            return Err(ClondikeError::InvalidMessage(
                "npm argv/envp data length mismatch".into(),
            ));
        }

        let envp = strings.split_off(argc);
        Ok((strings, envp))
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&(self.argv.len() as u32).to_le_bytes())?;
        w.write_all(&(self.envp.len() as u32).to_le_bytes())?;

        let filename_bytes = self.filename.as_bytes();
        w.write_all(&(filename_bytes.len() as u32).to_le_bytes())?;
        w.write_all(filename_bytes)?;

        let data = self.pack_data();
        w.write_all(&(data.len() as u32).to_le_bytes())?;
        w.write_all(&data)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let argc = read_u32(r)? as usize;
        let envc = read_u32(r)? as usize;

        let filename_len = read_u32(r)? as usize;
        let filename = String::from_utf8(read_bytes(r, filename_len)?)
            .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;

        let data_len = read_u32(r)? as usize;
        let data = read_bytes(r, data_len)?;
        let (argv, envp) = Self::unpack_data(&data, argc, envc)?;

        Ok(Self { filename, argv, envp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let params = NpmParams {
            filename: "/bin/foo".into(),
            argv: vec!["foo".into(), "a".into()],
            envp: vec![],
        };
        let mut buf = Vec::new();
        params.write_to(&mut buf).unwrap();
        let back = NpmParams::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.filename, "/bin/foo");
        assert_eq!(back.argv, vec!["foo".to_string(), "a".to_string()]);
        assert!(back.envp.is_empty());
    }

    #[test]
    fn round_trips_with_env() {
        let params = NpmParams {
            filename: "/bin/sh".into(),
            argv: vec!["sh".into()],
            envp: vec!["PATH=/usr/bin".into(), "HOME=/root".into()],
        };
        let mut buf = Vec::new();
        params.write_to(&mut buf).unwrap();
        let back = NpmParams::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.envp, params.envp);
    }
}
