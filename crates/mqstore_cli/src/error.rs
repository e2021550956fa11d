//! CLI errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No data directory at the given path.
    #[error("no broker data directory at {}", .0.display())]
    NotFound(PathBuf),

    /// Another process holds the directory lock.
    #[error("{} is locked by another process", .0.display())]
    Locked(PathBuf),

    /// Verification found problems.
    #[error("verification failed with {0} error(s)")]
    VerifyFailed(usize),

    /// Unknown output format.
    #[error("unknown output format {0:?}, expected text or json")]
    Format(String),

    /// Journal error.
    #[error(transparent)]
    Journal(#[from] mqstore_journal::JournalError),

    /// Paging error.
    #[error(transparent)]
    Paging(#[from] mqstore_paging::PagingError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] mqstore_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
