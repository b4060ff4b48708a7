use std::io::{Read, Write};

use clondike_wire::Result;

use crate::header::{read_bytes, read_u32};

/// Length-prefixed thread-local state block (spec. §4.1 step 8).
#[derive(Debug, Clone, Default)]
pub struct ThreadLocalBlock {
    pub bytes: Vec<u8>,
}

impl ThreadLocalBlock {
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&(self.bytes.len() as u32).to_le_bytes())?;
        w.write_all(&self.bytes)?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let len = read_u32(r)? as usize;
        Ok(Self { bytes: read_bytes(r, len)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_block() {
        let block = ThreadLocalBlock::default();
        let mut buf = Vec::new();
        block.write_to(&mut buf).unwrap();
        let back = ThreadLocalBlock::read_from(&mut &buf[..]).unwrap();
        assert!(back.bytes.is_empty());
    }
}
