use std::io::{Read, Write};

use clondike_wire::{ClondikeError, Result};

use crate::header::{read_bytes, read_u32};

/// Length-prefixed register payload so the restorer can accept equal-
/// architecture payloads and reject mismatched ones explicitly (spec.
/// §4.1 "Registers and TLS").
#[derive(Debug, Clone)]
pub struct RegisterBlock {
    pub bytes: Vec<u8>,
}

impl RegisterBlock {
    pub fn capture() -> Result<Self> {
        // The actual register capture goes through the ptrace/signal-frame
        // glue that is out of scope for this crate (spec. §1: "in-kernel
        // syscall interception glue" is an external collaborator); this
        // crate only owns the length-prefixed encode/decode contract.
        Err(ClondikeError::UnsupportedCheckpointEntity(
            "register capture requires the platform syscall-interception glue".into(),
        ))
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&(self.bytes.len() as u32).to_le_bytes())?;
        w.write_all(&self.bytes)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let len = read_u32(r)? as usize;
        Ok(Self { bytes: read_bytes(r, len)? })
    }

    /// Rejects a payload sized for a different architecture's register file
    /// (spec. §4.1 "accept equal-architecture payloads and reject
    /// mismatched ones explicitly").
    pub fn validate_len(&self, expected_len: usize) -> Result<()> {
        if self.bytes.len() != expected_len {
            return Err(ClondikeError::ArchitectureMismatch {
                local: format!("{expected_len} bytes"),
                remote: format!("{} bytes", self.bytes.len()),
            });
        }
        Ok(())
    }

    pub fn instruction_pointer_offset() -> usize {
        // x86_64 user_regs_struct: rip is the 17th 8-byte field.
        16 * 8
    }

    pub fn stack_pointer_offset() -> usize {
        // x86_64 user_regs_struct: rsp is the 20th 8-byte field.
        19 * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let block = RegisterBlock { bytes: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        let back = RegisterBlock::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rejects_length_mismatch() {
        let block = RegisterBlock { bytes: vec![0; 8] };
        assert!(block.validate_len(16).is_err());
        assert!(block.validate_len(8).is_ok());
    }
}
