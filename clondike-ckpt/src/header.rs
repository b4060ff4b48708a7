use std::io::{Read, Write};

use clondike_wire::{ClondikeError, Result};

/// 32-bit magic `0xDEADBEEF` (spec. §3).
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Bounded command-name length (spec. §3 "command name (bounded)").
pub const COMM_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn local() -> Self {
        if cfg!(target_arch = "x86_64") {
            Arch::X86_64
        } else {
            Arch::Aarch64
        }
    }

    fn to_tag(self) -> u32 {
        match self {
            Arch::X86_64 => 1,
            Arch::Aarch64 => 2,
        }
    }

    fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            1 => Ok(Arch::X86_64),
            2 => Ok(Arch::Aarch64),
            other => Err(ClondikeError::ArchitectureMismatch {
                local: format!("{:?}", Arch::local()),
                remote: format!("unknown tag {other}"),
            }),
        }
    }

    /// Page size implied by this architecture tag (spec. §6 "readers and
    /// writers must agree on page size (taken from the header's
    /// architecture tag)").
    pub fn page_size(self) -> usize {
        match self {
            Arch::X86_64 | Arch::Aarch64 => 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    pub vma_count: u32,
    pub file_count: u32,
    pub arch: Arch,
    pub is_32bit_application: bool,
    pub is_npm: bool,
    pub comm: String,
}

impl Header {
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        if self.comm.len() > COMM_MAX {
            return Err(ClondikeError::InvalidMessage("comm name too long".into()));
        }

        w.write_all(&MAGIC.to_le_bytes())?;
        w.write_all(&self.vma_count.to_le_bytes())?;
        w.write_all(&self.file_count.to_le_bytes())?;
        w.write_all(&self.arch.to_tag().to_le_bytes())?;
        w.write_all(&[self.is_32bit_application as u8, self.is_npm as u8])?;

        let comm_bytes = self.comm.as_bytes();
        w.write_all(&(comm_bytes.len() as u32).to_le_bytes())?;
        w.write_all(comm_bytes)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let magic = read_u32(r)?;
        if magic != MAGIC {
            return Err(ClondikeError::ChecksumOrMagicMismatch);
        }

        let vma_count = read_u32(r)?;
        let file_count = read_u32(r)?;
        let arch = Arch::from_tag(read_u32(r)?)?;

        let mut flags = [0u8; 2];
        r.read_exact(&mut flags)?;
        let is_32bit_application = flags[0] != 0;
        let is_npm = flags[1] != 0;

        if arch != Arch::local() {
            return Err(ClondikeError::ArchitectureMismatch {
                local: format!("{:?}", Arch::local()),
                remote: format!("{arch:?}"),
            });
        }
        if is_32bit_application != cfg!(target_pointer_width = "32") {
            return Err(ClondikeError::ArchitectureMismatch {
                local: "native address width".into(),
                remote: "32-bit application flag mismatch".into(),
            });
        }

        let comm_len = read_u32(r)? as usize;
        let mut comm_bytes = vec![0u8; comm_len];
        r.read_exact(&mut comm_bytes)?;
        let comm = String::from_utf8(comm_bytes)
            .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;

        Ok(Self { vma_count, file_count, arch, is_32bit_application, is_npm, comm })
    }
}

pub(crate) fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_bytes(r: &mut impl Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let h = Header {
            vma_count: 3,
            file_count: 5,
            arch: Arch::local(),
            is_32bit_application: cfg!(target_pointer_width = "32"),
            is_npm: false,
            comm: "sleep".into(),
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = Header::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.vma_count, 3);
        assert_eq!(back.file_count, 5);
        assert_eq!(back.comm, "sleep");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = vec![0u8; 4];
        assert!(matches!(
            Header::read_from(&mut &buf[..]),
            Err(ClondikeError::ChecksumOrMagicMismatch)
        ));
        buf[0] = 1; // still not the magic
    }
}
