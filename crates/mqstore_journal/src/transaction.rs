//! Per-transaction bookkeeping.

use crate::file::JournalFile;
use crate::types::FileId;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies an entry by file and offset.
pub(crate) type LocationKey = (FileId, u64);

/// Where an entry lives.
#[derive(Debug, Clone)]
pub(crate) struct RecordLocation {
    pub file: Arc<JournalFile>,
    pub offset: u64,
    pub size: u32,
}

impl RecordLocation {
    pub fn key(&self) -> LocationKey {
        (self.file.id(), self.offset)
    }
}

/// One transactional operation, applied on commit in log order.
#[derive(Debug, Clone)]
pub(crate) enum TxOp {
    /// ADD_TX or UPDATE_TX entry.
    Put { id: u64, location: RecordLocation },
    /// DELETE_TX entry.
    Delete { id: u64, location: RecordLocation },
}

impl TxOp {
    pub fn location(&self) -> &RecordLocation {
        match self {
            Self::Put { location, .. } | Self::Delete { location, .. } => location,
        }
    }

    pub fn location_mut(&mut self) -> &mut RecordLocation {
        match self {
            Self::Put { location, .. } | Self::Delete { location, .. } => location,
        }
    }
}

/// An open transaction.
///
/// Each file touched by the transaction carries one positive count until the
/// transaction completes; the completion record's file then negates it.
#[derive(Debug)]
pub(crate) struct JournalTransaction {
    id: u64,
    ops: Vec<TxOp>,
    files: Vec<Arc<JournalFile>>,
    per_file: HashMap<FileId, u32>,
    prepared: bool,
}

impl JournalTransaction {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ops: Vec::new(),
            files: Vec::new(),
            per_file: HashMap::new(),
            prepared: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut [TxOp] {
        &mut self.ops
    }

    pub fn push(&mut self, op: TxOp) {
        self.ops.push(op);
    }

    /// True if the last operation on `id` in this transaction adds or
    /// updates it.
    pub fn puts(&self, id: u64) -> bool {
        self.ops.iter().rev().find_map(|op| match op {
            TxOp::Put { id: put, .. } if *put == id => Some(true),
            TxOp::Delete { id: deleted, .. } if *deleted == id => Some(false),
            _ => None,
        }) == Some(true)
    }

    pub fn files(&self) -> &[Arc<JournalFile>] {
        &self.files
    }

    pub fn touches(&self, id: FileId) -> bool {
        self.files.iter().any(|f| f.id() == id)
    }

    /// Registers participation in `file`, counting one positive the first time.
    pub fn touch_file(&mut self, file: &Arc<JournalFile>) {
        if !self.touches(file.id()) {
            file.inc_pos();
            self.files.push(Arc::clone(file));
        }
    }

    /// Replaces participation in files matching `gone` with `replacements`.
    pub fn replace_files(&mut self, gone: &dyn Fn(FileId) -> bool, replacements: &[Arc<JournalFile>]) {
        self.files.retain(|f| !gone(f.id()));
        for file in replacements {
            self.touch_file(file);
        }
    }

    /// Counts a data record of this transaction written to `file`.
    pub fn count_record(&mut self, file: FileId) {
        *self.per_file.entry(file).or_insert(0) += 1;
    }

    /// Data records of this transaction written to `file`.
    pub fn count_in(&self, file: FileId) -> u32 {
        self.per_file.get(&file).copied().unwrap_or(0)
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn set_prepared(&mut self) {
        self.prepared = true;
    }

    /// Drops participation without completing, as for a transaction found
    /// unfinished on load.
    pub fn forget(&mut self) {
        for file in self.files.drain(..) {
            file.dec_pos();
        }
    }
}
