//! Client-facing error taxonomy.
//!
//! Every public proxy operation returns success or exactly one of these
//! codes; remote-call failures are translated at the call site and never
//! cross the client boundary raw.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("invalid argument")]
    InvalidArgument,

    #[error("path escapes the cache root: {0}")]
    PermissionDenied(String),

    #[error("{0} is a directory")]
    IsDirectory(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("cannot fit {0} bytes in cache")]
    OutOfSpace(u64),

    #[error("unknown descriptor {0}")]
    BadDescriptor(u64),

    #[error("local I/O failure: {0}")]
    Busy(String),

    #[error("remote rejected write-back for {0}")]
    WriteRejected(String),
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        FsError::Busy(e.to_string())
    }
}

pub type FsResult<T> = Result<T, FsError>;
