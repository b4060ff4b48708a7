use std::io::{Read, Write};

use clondike_wire::Result;

use crate::header::read_u64;

/// Per-signal disposition: `{handler, restorer, flags, mask}` (spec. §4.1
/// step 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub handler: u64,
    pub restorer: u64,
    pub flags: u64,
    pub mask: u64,
}

impl Default for Disposition {
    fn default() -> Self {
        Self { handler: 0, restorer: 0, flags: 0, mask: 0 }
    }
}

/// Iteration order for per-signal dispositions: ascending signal number,
/// skipping the two unblockable signals (supplemented from
/// `tcmi_ckpt_sig.h`, which iterates in this same order).
pub fn signal_numbers() -> impl Iterator<Item = u32> {
    (1..=64u32).filter(|&sig| sig != nix::libc::SIGKILL as u32 && sig != nix::libc::SIGSTOP as u32)
}

#[derive(Debug, Clone)]
pub struct SignalBlock {
    pub altstack_ptr: u64,
    pub altstack_size: u64,
    pub blocked_mask: u64,
    pub real_blocked_mask: u64,
    /// Indexed in the same order as [`signal_numbers`].
    pub dispositions: Vec<Disposition>,
}

impl SignalBlock {
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.altstack_ptr.to_le_bytes())?;
        w.write_all(&self.altstack_size.to_le_bytes())?;
        w.write_all(&self.blocked_mask.to_le_bytes())?;
        w.write_all(&self.real_blocked_mask.to_le_bytes())?;
        for d in &self.dispositions {
            w.write_all(&d.handler.to_le_bytes())?;
            w.write_all(&d.restorer.to_le_bytes())?;
            w.write_all(&d.flags.to_le_bytes())?;
            w.write_all(&d.mask.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let altstack_ptr = read_u64(r)?;
        let altstack_size = read_u64(r)?;
        let blocked_mask = read_u64(r)?;
        let real_blocked_mask = read_u64(r)?;

        let mut dispositions = Vec::new();
        for _ in signal_numbers() {
            dispositions.push(Disposition {
                handler: read_u64(r)?,
                restorer: read_u64(r)?,
                flags: read_u64(r)?,
                mask: read_u64(r)?,
            });
        }

        Ok(Self { altstack_ptr, altstack_size, blocked_mask, real_blocked_mask, dispositions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_unblockable_signals() {
        assert!(!signal_numbers().any(|s| s == nix::libc::SIGKILL as u32));
        assert!(!signal_numbers().any(|s| s == nix::libc::SIGSTOP as u32));
        assert_eq!(signal_numbers().count(), 62);
    }

    #[test]
    fn round_trips_block() {
        let block = SignalBlock {
            altstack_ptr: 0x7fff_0000,
            altstack_size: 8192,
            blocked_mask: 0b101,
            real_blocked_mask: 0,
            dispositions: signal_numbers().map(|_| Disposition::default()).collect(),
        };
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        let back = SignalBlock::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.altstack_ptr, 0x7fff_0000);
        assert_eq!(back.dispositions.len(), 62);
    }
}
