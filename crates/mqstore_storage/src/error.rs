//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a file.
    #[error("read beyond end of file {name}: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Name of the file.
        name: String,
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current file size.
        size: u64,
    },

    /// The file is not open.
    #[error("file {0} is not open")]
    NotOpen(String),

    /// The file or its writer has been closed.
    #[error("file {0} is closed")]
    Closed(String),

    /// A write submitted to an asynchronous writer failed.
    #[error("asynchronous write failed: {0}")]
    AsyncWrite(String),
}

impl StorageError {
    /// Returns true if this error wraps an I/O `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
