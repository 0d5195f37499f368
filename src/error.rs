//! Error kinds and their mapping onto the upcall adapter's negative-errno
//! protocol.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AofsError {
    #[error("no such entry")]
    NoSuchEntry,

    #[error("access denied")]
    AccessDenied,

    #[error("no space left on container")]
    NoSpace,

    #[error("a file with that name already exists")]
    AlreadyExists,

    #[error("file name longer than {MAX_NAME_LEN} bytes", MAX_NAME_LEN = crate::param::MAX_NAME_LEN)]
    NameTooLong,

    #[error("bad container magic")]
    BadMagic,

    #[error("corrupt metadata region: {0}")]
    CorruptMetadata(String),

    #[error("container I/O error: {0}")]
    ContainerIoError(#[from] std::io::Error),
}

impl AofsError {
    /// Negative-errno value the upcall adapter should reply with.
    ///
    /// Mount-time-only errors ([`AofsError::BadMagic`],
    /// `ContainerIoError` during initialization) never reach this path in
    /// practice; they abort `main` before a filesystem is mounted. The
    /// mapping below is defensive, not load-bearing.
    pub fn to_errno(&self) -> i32 {
        match self {
            AofsError::NoSuchEntry => libc::ENOENT,
            AofsError::AccessDenied => libc::EACCES,
            AofsError::NoSpace => libc::ENOSPC,
            AofsError::AlreadyExists => libc::EEXIST,
            AofsError::NameTooLong => libc::ENAMETOOLONG,
            AofsError::BadMagic | AofsError::CorruptMetadata(_) => libc::EIO,
            AofsError::ContainerIoError(_) => libc::EIO,
        }
    }
}
