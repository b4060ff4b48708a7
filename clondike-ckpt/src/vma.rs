use std::io::{Read, Write};

use clondike_wire::{ClondikeError, Result};

use crate::header::{read_bytes, read_u32, read_u64};

/// Minimal mirror of the Linux `vm_area_struct` flags this engine cares
/// about (spec. §3 VmaRecord invariants).
pub mod vm_flags {
    pub const WRITE: u64 = 1 << 0;
    pub const EXEC: u64 = 1 << 1;
    pub const GROWSDOWN: u64 = 1 << 2;
    pub const IO: u64 = 1 << 3;
    pub const SHARED: u64 = 1 << 4;
    pub const RESERVED: u64 = 1 << 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaKind {
    /// File-backed, read-only (spec. §3).
    Light,
    /// Fully-serialized contents (spec. §3).
    Heavy,
}

#[derive(Debug, Clone)]
pub struct VmaRecord {
    pub vm_start: u64,
    pub vm_end: u64,
    pub vm_flags: u64,
    pub vm_pgoff: u64,
    pub kind: VmaKind,
    /// Light: the backing file's path. Heavy: unused.
    pub path: Option<String>,
}

impl VmaRecord {
    pub fn len(&self) -> u64 {
        self.vm_end - self.vm_start
    }

    /// Checkpointing must reject I/O-mapped, shared-memory, reserved, and
    /// mis-sized regions (spec. §3 VmaRecord invariants).
    pub fn validate(&self, page_size: u64) -> Result<()> {
        if self.vm_flags & (vm_flags::IO | vm_flags::SHARED | vm_flags::RESERVED) != 0 {
            return Err(ClondikeError::UnsupportedCheckpointEntity(
                "I/O-mapped, shared, or reserved VMA".into(),
            ));
        }
        if self.len() == 0 || self.len() % page_size != 0 {
            return Err(ClondikeError::UnsupportedCheckpointEntity(
                "VMA size not a positive multiple of the page size".into(),
            ));
        }
        Ok(())
    }

    pub fn write_header(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.vm_start.to_le_bytes())?;
        w.write_all(&self.vm_end.to_le_bytes())?;
        w.write_all(&self.vm_flags.to_le_bytes())?;
        w.write_all(&self.vm_pgoff.to_le_bytes())?;
        w.write_all(&[match self.kind {
            VmaKind::Light => 0,
            VmaKind::Heavy => 1,
        }])?;
        let path_len = self.path.as_ref().map(|p| p.len()).unwrap_or(0) as u32;
        w.write_all(&path_len.to_le_bytes())?;
        Ok(())
    }

    pub fn read_header(r: &mut impl Read) -> Result<Self> {
        let vm_start = read_u64(r)?;
        let vm_end = read_u64(r)?;
        let vm_flags = read_u64(r)?;
        let vm_pgoff = read_u64(r)?;
        let mut kind_tag = [0u8];
        r.read_exact(&mut kind_tag)?;
        let kind = match kind_tag[0] {
            0 => VmaKind::Light,
            1 => VmaKind::Heavy,
            other => return Err(ClondikeError::InvalidMessage(format!("bad vma kind {other}"))),
        };
        let path_len = read_u32(r)? as usize;

        let path = if kind == VmaKind::Light {
            Some(
                String::from_utf8(read_bytes(r, path_len)?)
                    .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?,
            )
        } else {
            None
        };

        Ok(Self { vm_start, vm_end, vm_flags, vm_pgoff, kind, path })
    }
}

/// Writes a heavy VMA's page-aligned payload. An absent/never-touched page
/// is represented as a hole: `present` is a per-page bitmap so the reader
/// knows which pages to skip (spec. §3/§4.1 "zero-or-absent pages permitted
/// to be represented as holes").
pub fn write_heavy_payload(
    w: &mut impl Write,
    page_size: usize,
    pages: &[Option<&[u8]>],
) -> Result<()> {
    for page in pages {
        w.write_all(&[page.is_some() as u8])?;
        if let Some(data) = page {
            debug_assert_eq!(data.len(), page_size);
            w.write_all(data)?;
        }
    }
    Ok(())
}

pub fn read_heavy_payload(r: &mut impl Read, page_size: usize, page_count: usize) -> Result<Vec<Option<Vec<u8>>>> {
    let mut pages = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        let mut present = [0u8];
        r.read_exact(&mut present)?;
        if present[0] != 0 {
            pages.push(Some(read_bytes(r, page_size)?));
        } else {
            pages.push(None);
        }
    }
    Ok(pages)
}

/// Maps a light VMA at restore time: open the referenced file read-only and
/// map it at the recorded base with `MAP_FIXED` (spec. §4.1).
pub fn restore_light_vma(record: &VmaRecord) -> Result<()> {
    use nix::fcntl::OFlag;
    use nix::sys::mman::{mmap, MapFlags, ProtFlags};
    use nix::sys::stat::Mode;
    use std::num::NonZeroUsize;

    let path = record.path.as_ref().ok_or_else(|| {
        ClondikeError::InvalidMessage("light vma missing backing path".into())
    })?;
    let fd = nix::fcntl::open(path.as_str(), OFlag::O_RDONLY, Mode::empty())?;

    let mut prot = ProtFlags::PROT_READ;
    if record.vm_flags & vm_flags::EXEC != 0 {
        prot |= ProtFlags::PROT_EXEC;
    }

    let len = NonZeroUsize::new(record.len() as usize)
        .ok_or_else(|| ClondikeError::InvalidMessage("zero-length vma".into()))?;

    unsafe {
        mmap(
            std::num::NonZeroUsize::new(record.vm_start as usize),
            len,
            prot,
            MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE,
            fd,
            record.vm_pgoff as i64,
        )?;
    }
    nix::unistd::close(fd)?;
    Ok(())
}

/// Stack fixup for a `GROWSDOWN` region (spec. §4.1, §9 "Stack-fixup
/// obscurity"): (a) one-page anonymous `GROWSDOWN` mapping at the base,
/// (b) copy one page of stream content into it, (c) advance base by one
/// page, clear `GROWSDOWN`, fall through to normal mapping for the rest.
/// The contract is the *observable* end state, not this exact sequence —
/// callers on platforms without the restriction may collapse this to one
/// normal mapping.
pub fn restore_growsdown_vma(
    record: &VmaRecord,
    page_size: usize,
    first_page: &[u8],
) -> Result<()> {
    use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};
    use std::num::NonZeroUsize;

    debug_assert_eq!(first_page.len(), page_size);

    let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
    let len = NonZeroUsize::new(page_size).unwrap();

    let mapped = unsafe {
        mmap_anonymous(
            std::num::NonZeroUsize::new(record.vm_start as usize),
            len,
            prot,
            MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE | MapFlags::MAP_GROWSDOWN,
        )?
    };

    // Safe user-space page-copy primitive: the mapping was just created with
    // write permission, so a plain slice copy suffices.
    unsafe {
        std::ptr::copy_nonoverlapping(first_page.as_ptr(), mapped.as_ptr() as *mut u8, page_size);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_light_header() {
        let r = VmaRecord {
            vm_start: 0x1000,
            vm_end: 0x2000,
            vm_flags: vm_flags::EXEC,
            vm_pgoff: 0,
            kind: VmaKind::Light,
            path: Some("/bin/true".into()),
        };
        let mut buf = Vec::new();
        r.write_header(&mut buf).unwrap();
        buf.extend_from_slice(b"/bin/true");
        let mut reader = &buf[..];
        let back = VmaRecord::read_header(&mut reader).unwrap();
        assert_eq!(back.path.as_deref(), Some("/bin/true"));
        assert_eq!(back.kind, VmaKind::Light);
    }

    #[test]
    fn rejects_shared_and_io_vmas() {
        let r = VmaRecord {
            vm_start: 0x1000,
            vm_end: 0x2000,
            vm_flags: vm_flags::SHARED,
            vm_pgoff: 0,
            kind: VmaKind::Heavy,
            path: None,
        };
        assert!(r.validate(4096).is_err());
    }

    #[test]
    fn rejects_misaligned_size() {
        let r = VmaRecord {
            vm_start: 0x1000,
            vm_end: 0x1001,
            vm_flags: 0,
            vm_pgoff: 0,
            kind: VmaKind::Heavy,
            path: None,
        };
        assert!(r.validate(4096).is_err());
    }

    #[test]
    fn heavy_payload_encodes_holes() {
        let page = vec![7u8; 4096];
        let pages = vec![Some(page.as_slice()), None, Some(page.as_slice())];
        let mut buf = Vec::new();
        write_heavy_payload(&mut buf, 4096, &pages).unwrap();

        let back = read_heavy_payload(&mut &buf[..], 4096, 3).unwrap();
        assert!(back[0].is_some());
        assert!(back[1].is_none());
        assert!(back[2].is_some());
    }
}
