//! The restart binary handler: the small entry point a restored task execs
//! into before its real image is replayed (spec. §3 "Checkpoint file naming
//! & the restart binary handler"). It opens the checkpoint file named on its
//! command line, sniffs the magic to fail fast on garbage, then hands the
//! rest of the stream to [`crate::reader::CheckpointReader`].

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use clondike_wire::{ClondikeError, Result};

use crate::header::MAGIC;
use crate::npm::NpmParams;
use crate::reader::{CheckpointReader, RestoreOutcome};

/// Checkpoint files are named `<comm>.<pid>.<jiffies>` (spec.md §8 scenario
/// 1; supplemented from the original's single well-known directory
/// convention, `tcmi_ckptcom.c`). `comm` and `jiffies` are read from the
/// migrating process's own `/proc` entry by the caller.
pub fn checkpoint_file_name(comm: &str, pid: i32, jiffies: u64) -> String {
    format!("{comm}.{pid}.{jiffies}")
}

/// Reads and sniffs a checkpoint file's magic without consuming the stream,
/// so a caller can reject a non-checkpoint file before committing to a full
/// parse (spec. §4.1: malformed headers must be distinguishable from I/O
/// failure).
pub fn sniff_magic(file: &mut File) -> Result<bool> {
    let mut buf = [0u8; 4];
    let pos = file.stream_position()?;
    file.read_exact(&mut buf)?;
    file.seek(SeekFrom::Start(pos))?;
    Ok(u32::from_le_bytes(buf) == MAGIC)
}

/// What the restart binary's `main` must do next.
pub enum RestartAction {
    /// The task's image is fully live; resume execution in place.
    Restored,
    /// Re-exec the recorded binary with this argv/envp instead (NPM).
    Reexec(NpmParams),
}

/// Entry point a restored task execs into: open, sniff, parse, and restore.
pub fn run_restart(path: &str) -> Result<RestartAction> {
    let mut file = File::open(path)?;
    if !sniff_magic(&mut file)? {
        return Err(ClondikeError::ChecksumOrMagicMismatch);
    }

    let mut reader = BufReader::new(file);
    let image = CheckpointReader::read(&mut reader)?;

    match image.restore()? {
        RestoreOutcome::Restored => Ok(RestartAction::Restored),
        RestoreOutcome::Reexec { params } => Ok(RestartAction::Reexec(params.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_file_name_follows_comm_pid_jiffies_convention() {
        assert_eq!(checkpoint_file_name("sh", 42, 1000), "sh.42.1000");
    }
}
