//! # mqstore Journal
//!
//! Append-only record journal used as the broker's message store.
//!
//! The journal keeps records identified by caller-assigned 64-bit IDs across
//! a rolling set of pre-allocated files. It supports:
//!
//! - non-transactional add, update and delete
//! - transactions with two-phase commit; prepared transactions survive
//!   restarts
//! - reclaiming files whose entries are all dead
//! - online compaction of mostly-dead files, crash-safe through a control
//!   file
//!
//! ## Example
//!
//! ```rust
//! use mqstore_journal::{Journal, JournalConfig};
//! use mqstore_storage::InMemoryFileFactory;
//! use std::sync::Arc;
//!
//! let journal = Journal::open(JournalConfig::new().file_size(16 * 1024), Arc::new(InMemoryFileFactory::new())).unwrap();
//! journal.load().unwrap();
//! journal.append_add_record(1, 0, b"message", false).unwrap();
//! assert!(journal.contains_record(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compactor;
mod config;
mod control;
mod error;
mod executor;
mod file;
mod id;
mod journal;
mod manifest;
mod reader;
mod reclaimer;
mod record;
mod stats;
mod transaction;
mod types;

pub use compactor::{CompactionListener, CompactionPhase, CompactionResult, COMPACT_SUFFIX};
pub use config::{JournalConfig, MIN_FILE_SIZE};
pub use control::{ControlEntry, ControlFile};
pub use error::{JournalError, JournalResult};
pub use file::{
    clear_header, decode_header, encode_header, read_header, write_header, JournalFile, FILE_HEADER_SIZE, FILE_MAGIC,
};
pub use id::{BatchingIdGenerator, IdGenerator, ID_COUNTER_RECORD_TYPE};
pub use journal::Journal;
pub use manifest::JournalManifest;
pub use reader::{scan_file, FileScan, JournalFileReader, ScanEnd, ScannedRecord};
pub use record::{Decoded, JournalRecord, RecordKind};
pub use stats::{FileStats, JournalStats};
pub use types::{FileId, LoadStats, LoadedJournal, PreparedTransactionInfo, RecordInfo};
