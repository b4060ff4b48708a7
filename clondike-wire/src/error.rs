use thiserror::Error;

/// Error kinds shared across the whole control-plane (spec. §7).
#[derive(Debug, Error)]
pub enum ClondikeError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("checkpoint entity not supported: {0}")]
    UnsupportedCheckpointEntity(String),

    #[error("checksum or magic mismatch")]
    ChecksumOrMagicMismatch,

    #[error("architecture mismatch: local {local}, remote {remote}")]
    ArchitectureMismatch { local: String, remote: String },

    #[error("peer lost")]
    PeerLost,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("transaction timed out")]
    TransactionTimeout,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("director rejected the operation")]
    DirectorRejected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation not legal in current state: {0}")]
    BadState(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ClondikeError {
    /// Maps an error to the negative errno-shaped code returned by a
    /// control-surface write (spec. §7 "the error code is returned from the
    /// write").
    pub fn as_errno(&self) -> i32 {
        match self {
            ClondikeError::InvalidMessage(_) => -libc::EINVAL,
            ClondikeError::UnsupportedCheckpointEntity(_) => -libc::ENOTSUP,
            ClondikeError::ChecksumOrMagicMismatch => -libc::EILSEQ,
            ClondikeError::ArchitectureMismatch { .. } => -libc::ENOEXEC,
            ClondikeError::PeerLost => -libc::ESHUTDOWN,
            ClondikeError::AuthenticationFailed(_) => -libc::EACCES,
            ClondikeError::TransactionTimeout => -libc::ETIMEDOUT,
            ClondikeError::ResourceExhausted(_) => -libc::ENOSPC,
            ClondikeError::DirectorRejected => -libc::EPERM,
            ClondikeError::NotFound(_) => -libc::ESRCH,
            ClondikeError::BadState(_) => -libc::EBADFD,
            ClondikeError::Io(_) => -libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClondikeError>;
