//! Core type definitions for the journal.

use std::fmt;

/// Identifier of a journal file.
///
/// File IDs are assigned when a file becomes the current file and order the
/// journal: a record in a higher file ID is always newer. A recycled file
/// receives a fresh ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileId(pub u64);

impl FileId {
    /// Creates a new file ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next file ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// A live record as reconstructed by [`crate::Journal::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Record ID.
    pub id: u64,
    /// Caller-defined record type.
    pub user_type: u8,
    /// Latest payload.
    pub data: Vec<u8>,
    /// True if the latest entry was an update.
    pub is_update: bool,
}

/// A prepared transaction that survived a restart unresolved.
///
/// The caller (usually a transaction manager) must commit or roll it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransactionInfo {
    /// Transaction ID.
    pub tx_id: u64,
    /// Data passed to `append_prepare_record`.
    pub extra_data: Vec<u8>,
    /// Adds and updates in log order.
    pub records: Vec<RecordInfo>,
    /// Deletes in log order. `data` holds the delete payload.
    pub records_to_delete: Vec<RecordInfo>,
}

/// Counters gathered while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Data files replayed.
    pub files: usize,
    /// Records decoded.
    pub records_scanned: usize,
    /// Files that ended in a torn write.
    pub torn_tails: usize,
    /// Transactions discarded (never completed or failed the health check).
    pub discarded_transactions: usize,
    /// Whether an interrupted compaction was finished or rolled back.
    pub compaction_recovered: bool,
}

/// Everything [`crate::Journal::load`] reconstructs.
#[derive(Debug, Clone, Default)]
pub struct LoadedJournal {
    /// Live records ordered by ID.
    pub records: Vec<RecordInfo>,
    /// Prepared transactions awaiting resolution.
    pub prepared: Vec<PreparedTransactionInfo>,
    /// Load counters.
    pub stats: LoadStats,
}
