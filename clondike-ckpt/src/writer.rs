use std::io::Write;

use clondike_wire::{ClondikeError, Result};

use crate::fdcache::FdCache;
use crate::fs::WorkingDir;
use crate::header::{Arch, Header};
use crate::memdesc::MemoryDescriptor;
use crate::mode::{CheckpointMode, OpenFileSource, VmaSource};
use crate::openfile::{capture_open_file, OpenFileRecord};
use crate::regs::RegisterBlock;
use crate::rlimit::RLimitBlock;
use crate::sig::SignalBlock;
use crate::tls::ThreadLocalBlock;
use crate::vma::VmaKind;

/// Everything the writer needs about the process being checkpointed. Raw
/// register/VMA capture is assembled by the caller from the platform's
/// syscall-interception glue (spec. §1, out of scope here); this struct is
/// the seam between that and the wire-format logic this crate owns.
pub struct ProcessSnapshot {
    pub comm: String,
    pub is_32bit_application: bool,
    pub rlimits: RLimitBlock,
    pub open_files: Vec<OpenFileSource>,
    pub mem_desc: MemoryDescriptor,
    pub vmas: Vec<VmaSource>,
    pub registers: RegisterBlock,
    pub tls: ThreadLocalBlock,
    pub cwd: WorkingDir,
    pub sig: SignalBlock,
}

/// Serializes a live process per spec. §4.1's ordered write protocol.
pub struct CheckpointWriter;

impl CheckpointWriter {
    pub fn write(w: &mut impl Write, snapshot: &ProcessSnapshot, mode: &CheckpointMode) -> Result<()> {
        let page_size = Arch::local().page_size() as u64;

        // Step 1: count and validate everything up front. Nothing is
        // written to `w` until this whole pass succeeds (spec. §4.1:
        // "Non-supported file kinds produce an error before any output is
        // written").
        let mut file_records = Vec::with_capacity(snapshot.open_files.len());
        {
            let mut cache = FdCache::with_capacity(snapshot.open_files.len());
            let mut seen_fds = std::collections::HashSet::new();
            for file in &snapshot.open_files {
                let record = capture_open_file(file.fd, file.path.clone(), file.open_flags, file.mode, &mut cache)?;
                if let OpenFileRecord::New { fd, .. } = &record {
                    if !seen_fds.insert(*fd) {
                        return Err(ClondikeError::InvalidMessage(format!(
                            "duplicate New record for fd {fd}"
                        )));
                    }
                }
                file_records.push(record);
            }
        }

        let is_ppm = !mode.is_npm();
        let mut vma_records = Vec::new();
        if is_ppm {
            for vma in &snapshot.vmas {
                vma.record.validate(page_size)?;
                if mode.is_light_only() && vma.record.kind != VmaKind::Light {
                    return Err(ClondikeError::UnsupportedCheckpointEntity(
                        "PPM-light mode cannot serialize a heavy VMA".into(),
                    ));
                }
                vma_records.push(vma);
            }
        }

        // Step 2: header.
        let header = Header {
            vma_count: vma_records.len() as u32,
            file_count: file_records.len() as u32,
            arch: Arch::local(),
            is_32bit_application: snapshot.is_32bit_application,
            is_npm: mode.is_npm(),
            comm: snapshot.comm.clone(),
        };
        header.write_to(w)?;

        // Step 3: rlimits.
        snapshot.rlimits.write_to(w)?;

        // Step 4: open files, already deduped via the FD cache above.
        for record in &file_records {
            record.write_to(w)?;
        }

        // Step 5: memory descriptor.
        snapshot.mem_desc.write_to(w)?;

        // Step 6 (PPM only): VMAs, light or heavy, page-aligned heavy
        // payloads with holes for absent pages.
        if is_ppm {
            for vma in &vma_records {
                vma.record.write_header(w)?;
                if let Some(path) = &vma.record.path {
                    w.write_all(path.as_bytes())?;
                }
                if vma.record.kind == VmaKind::Heavy {
                    crate::vma::write_heavy_payload(
                        w,
                        page_size as usize,
                        &vma.pages.iter().map(|p| p.as_deref()).collect::<Vec<_>>(),
                    )?;
                }
            }
        }

        // Step 7: registers.
        snapshot.registers.write_to(w)?;

        // Step 8: thread-local state.
        snapshot.tls.write_to(w)?;

        // Step 9: working directory.
        snapshot.cwd.write_to(w)?;

        // Step 10: signal block.
        snapshot.sig.write_to(w)?;

        // Step 11 (NPM only): params.
        if let CheckpointMode::Npm(params) = mode {
            params.write_to(w)?;
        }

        Ok(())
    }
}
