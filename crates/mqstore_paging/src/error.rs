//! Error types for paging operations.

use thiserror::Error;

/// Result type for paging operations.
pub type PagingResult<T> = Result<T, PagingError>;

/// Errors that can occur in paging operations.
#[derive(Debug, Error)]
pub enum PagingError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] mqstore_storage::StorageError),

    /// Journal error while recording a depage or page transaction.
    #[error("journal error: {0}")]
    Journal(#[from] mqstore_journal::JournalError),

    /// A page or paging record could not be decoded.
    #[error("paging corruption: {message}")]
    Corruption {
        /// Description of the damage.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid paging configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// The store or manager is not in a state that allows the operation.
    #[error("invalid paging state: {message}")]
    InvalidState {
        /// Description of the state.
        message: String,
    },

    /// Acknowledgement or cancel of a message that is not being delivered.
    #[error("message {message_id} is not being delivered")]
    NotDelivering {
        /// The message ID.
        message_id: u64,
    },

    /// Acknowledgement of a message already acknowledged in a transaction.
    #[error("message {message_id} is already acknowledged in transaction {tx_id}")]
    AlreadyAcknowledged {
        /// The message ID.
        message_id: u64,
        /// The transaction holding the acknowledgement.
        tx_id: u64,
    },
}

impl PagingError {
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
}
