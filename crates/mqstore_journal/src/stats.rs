//! Journal statistics.
//!
//! Counters are atomics updated on the hot path; [`JournalStats`] and
//! [`FileStats`] are point-in-time snapshots.

use crate::types::FileId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of one journal instance.
#[derive(Debug, Default)]
pub(crate) struct JournalCounters {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    files_reclaimed: AtomicU64,
    compactions: AtomicU64,
}

impl JournalCounters {
    pub fn record_append(&self, bytes: usize) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaim(&self, files: usize) {
        self.files_reclaimed.fetch_add(files as u64, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`.
    pub fn fill(&self, stats: &mut JournalStats) {
        stats.appends = self.appends.load(Ordering::Relaxed);
        stats.bytes_appended = self.bytes_appended.load(Ordering::Relaxed);
        stats.commits = self.commits.load(Ordering::Relaxed);
        stats.rollbacks = self.rollbacks.load(Ordering::Relaxed);
        stats.files_reclaimed = self.files_reclaimed.load(Ordering::Relaxed);
        stats.compactions = self.compactions.load(Ordering::Relaxed);
    }
}

/// Snapshot of journal-wide state and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Sealed data files.
    pub data_files: usize,
    /// Pre-allocated files waiting in the pool.
    pub free_files: usize,
    /// The file currently appended to.
    pub current_file: Option<FileId>,
    /// Live records.
    pub live_records: usize,
    /// Sum of live bytes over all files.
    pub live_bytes: i64,
    /// Open transactions, prepared ones included.
    pub pending_transactions: usize,
    /// Records appended since open.
    pub appends: u64,
    /// Bytes appended since open.
    pub bytes_appended: u64,
    /// Transactions committed since open.
    pub commits: u64,
    /// Transactions rolled back since open.
    pub rollbacks: u64,
    /// Files reclaimed since open.
    pub files_reclaimed: u64,
    /// Compactions finished since open.
    pub compactions: u64,
}

/// Snapshot of one journal file's accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    /// File ID.
    pub id: FileId,
    /// File name.
    pub name: String,
    /// Bytes of live record entries.
    pub live_bytes: i64,
    /// Positive count.
    pub pos_count: u32,
    /// Negative counts per negated file, ordered by file ID.
    pub negated: Vec<(FileId, u32)>,
    /// Whether this is the current file.
    pub is_current: bool,
    /// Result of the last reclaim scan.
    pub can_reclaim: bool,
}
