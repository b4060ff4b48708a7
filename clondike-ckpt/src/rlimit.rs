use std::io::{Read, Write};

use clondike_wire::Result;
use nix::sys::resource::Resource;

use crate::header::read_u64;

/// The canonical resource-number order used for both write and read, so the
/// two sides agree without exchanging resource names (spec. §4.1 step 3,
/// supplemented per `tcmi_ckpt_resources.h`'s fixed enumeration order).
const RESOURCES: &[Resource] = &[
    Resource::RLIMIT_CPU,
    Resource::RLIMIT_FSIZE,
    Resource::RLIMIT_DATA,
    Resource::RLIMIT_STACK,
    Resource::RLIMIT_CORE,
    Resource::RLIMIT_RSS,
    Resource::RLIMIT_NPROC,
    Resource::RLIMIT_NOFILE,
    Resource::RLIMIT_MEMLOCK,
    Resource::RLIMIT_AS,
    Resource::RLIMIT_LOCKS,
    Resource::RLIMIT_SIGPENDING,
    Resource::RLIMIT_MSGQUEUE,
    Resource::RLIMIT_NICE,
    Resource::RLIMIT_RTPRIO,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RLimitEntry {
    pub cur: u64,
    pub max: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RLimitBlock {
    pub entries: Vec<RLimitEntry>,
}

const RLIM_INFINITY: u64 = u64::MAX;

impl RLimitBlock {
    /// Captures the current process's rlimits in the fixed resource order.
    pub fn capture() -> Result<Self> {
        let mut entries = Vec::with_capacity(RESOURCES.len());
        for resource in RESOURCES {
            let (soft, hard) = nix::sys::resource::getrlimit(*resource)?;
            entries.push(RLimitEntry {
                cur: soft.unwrap_or(RLIM_INFINITY),
                max: hard.unwrap_or(RLIM_INFINITY),
            });
        }
        Ok(Self { entries })
    }

    /// Applies the block directly to the current process (spec. §4.1 read
    /// protocol: "Rlimits applied directly").
    pub fn apply(&self) -> Result<()> {
        for (resource, entry) in RESOURCES.iter().zip(&self.entries) {
            let soft = if entry.cur == RLIM_INFINITY { None } else { Some(entry.cur) };
            let hard = if entry.max == RLIM_INFINITY { None } else { Some(entry.max) };
            nix::sys::resource::setrlimit(*resource, soft, hard)?;
        }
        Ok(())
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        for entry in &self.entries {
            w.write_all(&entry.cur.to_le_bytes())?;
            w.write_all(&entry.max.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let mut entries = Vec::with_capacity(RESOURCES.len());
        for _ in RESOURCES {
            let cur = read_u64(r)?;
            let max = read_u64(r)?;
            entries.push(RLimitEntry { cur, max });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fixed_order() {
        let block = RLimitBlock {
            entries: RESOURCES.iter().map(|_| RLimitEntry { cur: 10, max: RLIM_INFINITY }).collect(),
        };
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        let back = RLimitBlock::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.entries.len(), RESOURCES.len());
        assert_eq!(back.entries[0], RLimitEntry { cur: 10, max: RLIM_INFINITY });
    }
}
