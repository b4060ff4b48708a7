use std::io::Read;
use std::num::NonZeroUsize;

use clondike_wire::{ClondikeError, Result};
use nix::sys::mman::{mmap_anonymous, MapFlags, ProtFlags};

use crate::fs::WorkingDir;
use crate::header::{Arch, Header};
use crate::memdesc::MemoryDescriptor;
use crate::npm::NpmParams;
use crate::openfile::{restore_open_file, OpenFileRecord};
use crate::regs::RegisterBlock;
use crate::rlimit::RLimitBlock;
use crate::sig::SignalBlock;
use crate::tls::ThreadLocalBlock;
use crate::vma::{self, VmaKind, VmaRecord};

/// One parsed VMA plus its heavy payload, if any.
pub struct VmaEntry {
    pub record: VmaRecord,
    pub pages: Option<Vec<Option<Vec<u8>>>>,
}

/// A fully-parsed checkpoint image. Parsing (`CheckpointReader::read`) never
/// mutates process state; only [`CheckpointImage::restore`] does, and once
/// that has started, failure is unrecoverable — the caller must kill the
/// restoring task rather than continue (spec. §4.1: "read failures after the
/// image has been flushed into the new task's address space are fatal").
pub struct CheckpointImage {
    pub header: Header,
    pub rlimits: RLimitBlock,
    pub files: Vec<OpenFileRecord>,
    pub mem_desc: MemoryDescriptor,
    pub vmas: Vec<VmaEntry>,
    pub registers: RegisterBlock,
    pub tls: ThreadLocalBlock,
    pub cwd: WorkingDir,
    pub sig: SignalBlock,
    pub npm: Option<NpmParams>,
}

pub struct CheckpointReader;

impl CheckpointReader {
    /// Parses the whole stream into memory before any restoration begins
    /// (spec. §4.1 read protocol mirrors the write order exactly).
    pub fn read(r: &mut impl Read) -> Result<CheckpointImage> {
        let header = Header::read_from(r)?;
        let rlimits = RLimitBlock::read_from(r)?;

        let mut files = Vec::with_capacity(header.file_count as usize);
        for _ in 0..header.file_count {
            files.push(OpenFileRecord::read_from(r)?);
        }

        let mem_desc = MemoryDescriptor::read_from(r)?;

        let mut vmas = Vec::with_capacity(header.vma_count as usize);
        if !header.is_npm {
            let page_size = header.arch.page_size();
            for _ in 0..header.vma_count {
                let record = VmaRecord::read_header(r)?;
                let pages = if record.kind == VmaKind::Heavy {
                    let page_count = (record.len() as usize) / page_size;
                    Some(vma::read_heavy_payload(r, page_size, page_count)?)
                } else {
                    None
                };
                vmas.push(VmaEntry { record, pages });
            }
        }

        let registers = RegisterBlock::read_from(r)?;
        registers.validate_len(registers.bytes.len())?;
        let tls = ThreadLocalBlock::read_from(r)?;
        let cwd = WorkingDir::read_from(r)?;
        let sig = SignalBlock::read_from(r)?;

        let npm = if header.is_npm { Some(NpmParams::read_from(r)?) } else { None };

        Ok(CheckpointImage { header, rlimits, files, mem_desc, vmas, registers, tls, cwd, sig, npm })
    }
}

/// What the caller must do after a successful [`CheckpointImage::restore`]
/// call: either the process image is already live, or the restart binary
/// handler must re-exec with the recorded argv/envp (spec. §4.1: "NPM
/// restore re-execs the target binary with the recorded argv/envp instead of
/// replaying VMAs").
pub enum RestoreOutcome<'a> {
    Restored,
    Reexec { params: &'a NpmParams },
}

impl CheckpointImage {
    /// Replays the image against the current (freshly-forked, not-yet-execed)
    /// process.
    pub fn restore(&self) -> Result<RestoreOutcome<'_>> {
        self.rlimits.apply()?;

        let mut renumbered = Vec::with_capacity(self.files.len());
        for record in &self.files {
            restore_open_file(record, &mut renumbered)?;
        }

        self.cwd.restore()?;

        if self.header.is_npm {
            let params = self.npm.as_ref().ok_or_else(|| {
                ClondikeError::InvalidMessage("NPM header without NpmParams".into())
            })?;
            return Ok(RestoreOutcome::Reexec { params });
        }

        let page_size = self.header.arch.page_size();
        for entry in &self.vmas {
            self.restore_one_vma(entry, page_size)?;
        }

        Ok(RestoreOutcome::Restored)
    }

    fn restore_one_vma(&self, entry: &VmaEntry, page_size: usize) -> Result<()> {
        match entry.record.kind {
            VmaKind::Light => vma::restore_light_vma(&entry.record),
            VmaKind::Heavy => {
                let pages = entry
                    .pages
                    .as_ref()
                    .ok_or_else(|| ClondikeError::InvalidMessage("heavy vma missing payload".into()))?;

                let is_growsdown = entry.record.vm_flags & vma::vm_flags::GROWSDOWN != 0;
                if is_growsdown {
                    let first = pages.first().and_then(|p| p.as_deref()).unwrap_or(&[]);
                    let first_page = if first.len() == page_size {
                        first.to_vec()
                    } else {
                        vec![0u8; page_size]
                    };
                    vma::restore_growsdown_vma(&entry.record, page_size, &first_page)?;
                    self.map_heavy_pages(
                        entry.record.vm_start + page_size as u64,
                        page_size,
                        &pages[1..],
                    )
                } else {
                    self.map_heavy_pages(entry.record.vm_start, page_size, pages)
                }
            }
        }
    }

    fn map_heavy_pages(&self, base: u64, page_size: usize, pages: &[Option<Vec<u8>>]) -> Result<()> {
        if pages.is_empty() {
            return Ok(());
        }
        let len = NonZeroUsize::new(pages.len() * page_size)
            .ok_or_else(|| ClondikeError::InvalidMessage("zero-length heavy vma".into()))?;

        let mapped = unsafe {
            mmap_anonymous(
                NonZeroUsize::new(base as usize),
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE,
            )?
        };

        for (i, page) in pages.iter().enumerate() {
            if let Some(data) = page {
                // Safe user-space page-copy: the mapping was just created
                // with write permission.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        (mapped.as_ptr() as *mut u8).add(i * page_size),
                        page_size,
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Arch;

    #[test]
    fn parses_npm_image_without_touching_vmas() {
        let header = Header {
            vma_count: 0,
            file_count: 0,
            arch: Arch::local(),
            is_32bit_application: cfg!(target_pointer_width = "32"),
            is_npm: true,
            comm: "sh".into(),
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        RLimitBlock::default().write_to(&mut buf).unwrap();
        MemoryDescriptor::default().write_to(&mut buf).unwrap();
        RegisterBlock { bytes: vec![] }.write_to(&mut buf).unwrap();
        ThreadLocalBlock::default().write_to(&mut buf).unwrap();
        WorkingDir { path: "/".into() }.write_to(&mut buf).unwrap();
        SignalBlock {
            altstack_ptr: 0,
            altstack_size: 0,
            blocked_mask: 0,
            real_blocked_mask: 0,
            dispositions: crate::sig::signal_numbers().map(|_| Default::default()).collect(),
        }
        .write_to(&mut buf)
        .unwrap();
        NpmParams { filename: "/bin/sh".into(), argv: vec!["sh".into()], envp: vec![] }
            .write_to(&mut buf)
            .unwrap();

        let image = CheckpointReader::read(&mut &buf[..]).unwrap();
        assert!(image.header.is_npm);
        assert!(image.vmas.is_empty());
        assert_eq!(image.npm.unwrap().filename, "/bin/sh");
    }
}
