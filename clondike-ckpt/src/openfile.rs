use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};

use clondike_wire::{ClondikeError, Result};
use nix::fcntl::OFlag;
use nix::sys::stat::{fstat, Mode, SFlag};

use crate::header::{read_bytes, read_u32, read_u64};

/// The four serializable file kinds (spec. §3 "OpenFileRecord" invariants):
/// sockets, block devices, and symlinks cause checkpoint creation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Character,
    Fifo,
}

impl FileType {
    fn to_tag(self) -> u8 {
        match self {
            FileType::Regular => 0,
            FileType::Directory => 1,
            FileType::Character => 2,
            FileType::Fifo => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => FileType::Regular,
            1 => FileType::Directory,
            2 => FileType::Character,
            3 => FileType::Fifo,
            other => return Err(ClondikeError::InvalidMessage(format!("bad file type {other}"))),
        })
    }

    /// Classifies an open fd, failing for unsupported kinds (spec. §3:
    /// "only regular, directory, character, and FIFO types are
    /// serializable — sockets, block devices, and symlinks cause checkpoint
    /// creation to fail").
    pub fn classify(fd: RawFd) -> Result<Self> {
        let st = fstat(fd)?;
        let mode = SFlag::from_bits_truncate(st.st_mode as nix::libc::mode_t);
        if mode.contains(SFlag::S_IFREG) {
            Ok(FileType::Regular)
        } else if mode.contains(SFlag::S_IFDIR) {
            Ok(FileType::Directory)
        } else if mode.contains(SFlag::S_IFCHR) {
            Ok(FileType::Character)
        } else if mode.contains(SFlag::S_IFIFO) {
            Ok(FileType::Fifo)
        } else {
            Err(ClondikeError::UnsupportedCheckpointEntity(format!(
                "unsupported file mode {:o}",
                st.st_mode
            )))
        }
    }
}

/// A tagged variant: `New{..}` or `Dup{fd, dup_fd}` (spec. §3).
#[derive(Debug, Clone)]
pub enum OpenFileRecord {
    New {
        fd: i32,
        pos: u64,
        open_flags: i32,
        mode: u32,
        file_type: FileType,
        path: String,
    },
    Dup {
        fd: i32,
        dup_fd: i32,
    },
}

impl OpenFileRecord {
    pub fn fd(&self) -> i32 {
        match self {
            OpenFileRecord::New { fd, .. } => *fd,
            OpenFileRecord::Dup { fd, .. } => *fd,
        }
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        match self {
            OpenFileRecord::New { fd, pos, open_flags, mode, file_type, path } => {
                w.write_all(&[0u8])?;
                w.write_all(&fd.to_le_bytes())?;
                w.write_all(&pos.to_le_bytes())?;
                w.write_all(&open_flags.to_le_bytes())?;
                w.write_all(&mode.to_le_bytes())?;
                w.write_all(&[file_type.to_tag()])?;
                let path_bytes = path.as_bytes();
                w.write_all(&(path_bytes.len() as u32).to_le_bytes())?;
                w.write_all(path_bytes)?;
            }
            OpenFileRecord::Dup { fd, dup_fd } => {
                w.write_all(&[1u8])?;
                w.write_all(&fd.to_le_bytes())?;
                w.write_all(&dup_fd.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self> {
        let mut tag = [0u8];
        r.read_exact(&mut tag)?;
        match tag[0] {
            0 => {
                let fd = read_u32(r)? as i32;
                let pos = read_u64(r)?;
                let open_flags = read_u32(r)? as i32;
                let mode = read_u32(r)?;
                let mut ft = [0u8];
                r.read_exact(&mut ft)?;
                let file_type = FileType::from_tag(ft[0])?;
                let path_len = read_u32(r)? as usize;
                let path = String::from_utf8(read_bytes(r, path_len)?)
                    .map_err(|e| ClondikeError::InvalidMessage(e.to_string()))?;
                Ok(OpenFileRecord::New { fd, pos, open_flags, mode, file_type, path })
            }
            1 => {
                let fd = read_u32(r)? as i32;
                let dup_fd = read_u32(r)? as i32;
                Ok(OpenFileRecord::Dup { fd, dup_fd })
            }
            other => Err(ClondikeError::InvalidMessage(format!("bad open-file tag {other}"))),
        }
    }
}

/// Captures one open fd into a record, consulting the FD cache to dedup
/// `dup`-style identity (spec. §4.1 step 4).
pub fn capture_open_file(
    fd: RawFd,
    path: String,
    open_flags: i32,
    mode: u32,
    cache: &mut crate::fdcache::FdCache,
) -> Result<OpenFileRecord> {
    let file_type = FileType::classify(fd)?;
    let identity = crate::fdcache::FileIdentity::of(fd)?;

    if let Some(cached_fd) = cache.lookup(identity) {
        return Ok(OpenFileRecord::Dup { fd, dup_fd: cached_fd });
    }

    let pos = match file_type {
        FileType::Regular | FileType::Directory => {
            nix::unistd::lseek(fd, 0, nix::unistd::Whence::SeekCur)? as u64
        }
        FileType::Character | FileType::Fifo => 0,
    };

    cache.insert(identity, fd);
    Ok(OpenFileRecord::New { fd, pos, open_flags, mode, file_type, path })
}

/// Replays a `New`/`Dup` record against the restoring process (spec. §4.1
/// read protocol, open-file replay rules).
pub fn restore_open_file(record: &OpenFileRecord, renumbered: &mut Vec<(i32, i32)>) -> Result<()> {
    match record {
        OpenFileRecord::New { fd, pos, open_flags, mode, file_type, path } => {
            let flags = OFlag::from_bits_truncate(*open_flags);
            let opened = nix::fcntl::open(path.as_str(), flags, Mode::from_bits_truncate(*mode))?;

            if opened != *fd {
                // fd-renumbering primitive: force the descriptor to land at
                // the recorded number, then close the temporary (spec. §4.1).
                nix::unistd::dup2(opened, *fd)?;
                nix::unistd::close(opened)?;
            }

            match file_type {
                FileType::Regular | FileType::Directory => {
                    nix::unistd::lseek(*fd, *pos as i64, nix::unistd::Whence::SeekSet)?;
                }
                FileType::Character | FileType::Fifo => {
                    // opened without a seek (spec. §4.1).
                }
            }
            renumbered.push((opened, *fd));
            Ok(())
        }
        OpenFileRecord::Dup { fd, dup_fd } => {
            nix::unistd::dup2(*dup_fd, *fd)?;
            Ok(())
        }
    }
}

pub fn fd_as_raw(fd: &impl AsRawFd) -> RawFd {
    fd.as_raw_fd()
}
