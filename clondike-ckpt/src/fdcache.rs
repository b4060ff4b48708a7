//! Bounded association list for dedup across `dup`-style identity within one
//! checkpoint stream (spec. §4.2). Used only within one checkpoint stream;
//! discarded at end — there is deliberately no persistence or sharing here.

use std::os::fd::RawFd;

use clondike_wire::Result;
use nix::sys::stat::fstat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    pub fn of(fd: RawFd) -> Result<Self> {
        let st = fstat(fd)?;
        Ok(Self { dev: st.st_dev as u64, ino: st.st_ino as u64 })
    }
}

/// `insert`/`lookup` as a simple ordered association list: `lookup` returns
/// the earliest-inserted matching fd (spec. §4.2).
#[derive(Debug, Default)]
pub struct FdCache {
    entries: Vec<(FileIdentity, i32)>,
}

impl FdCache {
    /// Sized at checkpoint start from the open-file count (spec. §4.2).
    pub fn with_capacity(open_file_count: usize) -> Self {
        Self { entries: Vec::with_capacity(open_file_count) }
    }

    pub fn insert(&mut self, identity: FileIdentity, fd: i32) {
        self.entries.push((identity, fd));
    }

    pub fn lookup(&self, identity: FileIdentity) -> Option<i32> {
        self.entries.iter().find(|(id, _)| *id == identity).map(|(_, fd)| *fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_earliest_inserted_match() {
        let mut cache = FdCache::with_capacity(4);
        let id = FileIdentity { dev: 1, ino: 2 };
        cache.insert(id, 3);
        cache.insert(id, 9); // a later dup of the same identity
        assert_eq!(cache.lookup(id), Some(3));
    }

    #[test]
    fn misses_unknown_identity() {
        let cache = FdCache::with_capacity(4);
        assert_eq!(cache.lookup(FileIdentity { dev: 1, ino: 2 }), None);
    }
}
