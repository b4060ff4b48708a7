use std::io::{Read, Write};

use clondike_wire::Result;

use crate::header::read_u64;

/// Code/data/brk/stack/arg/env bounds plus default flags (spec. §4.1
/// step 5).
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDescriptor {
    pub start_code: u64,
    pub end_code: u64,
    pub start_data: u64,
    pub end_data: u64,
    pub start_brk: u64,
    pub brk: u64,
    pub start_stack: u64,
    pub arg_start: u64,
    pub arg_end: u64,
    pub env_start: u64,
    pub env_end: u64,
    pub flags: u64,
}

impl MemoryDescriptor {
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        for field in [
            self.start_code,
            self.end_code,
            self.start_data,
            self.end_data,
            self.start_brk,
            self.brk,
            self.start_stack,
            self.arg_start,
            self.arg_end,
            self.env_start,
            self.env_end,
            self.flags,
        ] {
            w.write_all(&field.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        Ok(Self {
            start_code: read_u64(r)?,
            end_code: read_u64(r)?,
            start_data: read_u64(r)?,
            end_data: read_u64(r)?,
            start_brk: read_u64(r)?,
            brk: read_u64(r)?,
            start_stack: read_u64(r)?,
            arg_start: read_u64(r)?,
            arg_end: read_u64(r)?,
            env_start: read_u64(r)?,
            env_end: read_u64(r)?,
            flags: read_u64(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let desc = MemoryDescriptor { start_code: 0x400000, end_code: 0x401000, ..Default::default() };
        let mut buf = Vec::new();
        desc.write_to(&mut buf).unwrap();
        let back = MemoryDescriptor::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.start_code, 0x400000);
        assert_eq!(back.end_code, 0x401000);
    }
}
