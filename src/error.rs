//! Error types for chmkit operations.

use thiserror::Error;

/// Errors that can occur while reading CHM archives or resolving paths into them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad signature, unsupported header version, or offsets pointing outside the file.
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// The compressed stream for an object is truncated or corrupt.
    ///
    /// Only the requested object is affected; other objects stay readable.
    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("No home page found")]
    NoHomePage,

    #[error("Index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unknown archive: {0}")]
    UnknownArchive(String),

    #[error("Duplicate archive id: {0}")]
    DuplicateId(String),

    #[error("Archive is closed")]
    Closed,

    #[error("Invalid virtual path: {0}")]
    InvalidVirtualPath(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedArchive(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Decompression(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
