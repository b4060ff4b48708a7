use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use clondike_wire::{ClondikeError, Result};

use crate::header::{read_bytes, read_u32};

/// Current working-directory path, length-prefixed (spec. §4.1 step 9).
#[derive(Debug, Clone)]
pub struct WorkingDir {
    pub path: PathBuf,
}

impl WorkingDir {
    pub fn capture() -> Result<Self> {
        Ok(Self { path: std::env::current_dir()? })
    }

    /// Resolves the recorded path and installs it as the process's current
    /// directory (spec. §4.1: "the host may be a stacking filesystem that
    /// remaps this path" — out of scope here, we only consume the resulting
    /// path via `std::env::set_current_dir`).
    pub fn restore(&self) -> Result<()> {
        std::env::set_current_dir(&self.path)?;
        Ok(())
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        let bytes = path_to_bytes(&self.path);
        w.write_all(&(bytes.len() as u32).to_le_bytes())?;
        w.write_all(bytes)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let len = read_u32(r)? as usize;
        let bytes = read_bytes(r, len)?;
        let s = String::from_utf8(bytes).map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn path_to_bytes(path: &Path) -> &[u8] {
    path.to_str().unwrap_or_default().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let dir = WorkingDir { path: PathBuf::from("/var/tmp") };
        let mut buf = Vec::new();
        dir.write_to(&mut buf).unwrap();
        let back = WorkingDir::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.path, PathBuf::from("/var/tmp"));
    }
}
