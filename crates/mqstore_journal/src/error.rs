//! Error types for journal operations.

use crate::types::FileId;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] mqstore_storage::StorageError),

    /// Update or delete of a record that is not live.
    #[error("record not found: {id}")]
    RecordNotFound {
        /// The record ID.
        id: u64,
    },

    /// Non-transactional add of a record that is already live.
    #[error("record already exists: {id}")]
    DuplicateRecord {
        /// The record ID.
        id: u64,
    },

    /// Commit or rollback of an unknown (or already completed) transaction.
    #[error("transaction not found: {tx_id}")]
    TransactionNotFound {
        /// The transaction ID.
        tx_id: u64,
    },

    /// A record does not fit into an empty journal file.
    #[error("record of {size} bytes exceeds journal file capacity of {max} bytes")]
    RecordTooLarge {
        /// Encoded record size.
        size: usize,
        /// Largest record a file can hold.
        max: usize,
    },

    /// A file listed in the journal manifest is missing on disk.
    #[error("journal file {file_id} is missing: journal data has been lost")]
    MissingFile {
        /// The missing file.
        file_id: FileId,
    },

    /// Structural damage that is not a torn tail.
    #[error("journal corruption: {message}")]
    Corruption {
        /// Description of the damage.
        message: String,
    },

    /// Invalid configuration value.
    #[error("invalid journal configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current journal state.
    #[error("invalid journal state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Compaction was cancelled before the file swap.
    #[error("compaction cancelled")]
    CompactionCancelled,
}

impl JournalError {
    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Returns true for errors caused by the caller rather than the journal.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. }
                | Self::DuplicateRecord { .. }
                | Self::TransactionNotFound { .. }
                | Self::RecordTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations() {
        assert!(JournalError::RecordNotFound { id: 1 }.is_contract_violation());
        assert!(JournalError::TransactionNotFound { tx_id: 1 }.is_contract_violation());
        assert!(!JournalError::corruption("x").is_contract_violation());
        assert!(!JournalError::MissingFile {
            file_id: FileId::new(3)
        }
        .is_contract_violation());
    }

    #[test]
    fn display_messages() {
        let err = JournalError::MissingFile {
            file_id: FileId::new(7),
        };
        assert_eq!(
            err.to_string(),
            "journal file file:7 is missing: journal data has been lost"
        );
    }
}
