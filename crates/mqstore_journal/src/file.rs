//! Journal file metadata and header.

use crate::error::JournalResult;
use crate::types::FileId;
use mqstore_storage::SequentialFile;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

/// Magic bytes at the start of an active journal file.
pub const FILE_MAGIC: [u8; 4] = *b"MQJF";

/// Current file format version.
pub const FILE_VERSION: u16 = 1;

/// Size of the file header in bytes.
pub const FILE_HEADER_SIZE: usize = 24;

/// Encodes the header for file `id`.
#[must_use]
pub fn encode_header(id: FileId) -> [u8; FILE_HEADER_SIZE] {
    let mut header = [0u8; FILE_HEADER_SIZE];
    header[0..4].copy_from_slice(&FILE_MAGIC);
    header[4..6].copy_from_slice(&FILE_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&id.as_u64().to_le_bytes());
    header
}

/// Decodes a header, returning `None` for pooled or foreign files.
#[must_use]
pub fn decode_header(bytes: &[u8]) -> Option<FileId> {
    if bytes.len() < FILE_HEADER_SIZE || bytes[0..4] != FILE_MAGIC {
        return None;
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FILE_VERSION {
        return None;
    }
    let id = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
    Some(FileId::new(id))
}

/// Reads the header of an open file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_header(file: &dyn SequentialFile) -> JournalResult<Option<FileId>> {
    if file.size()? < FILE_HEADER_SIZE as u64 {
        return Ok(None);
    }
    Ok(decode_header(&file.read_at(0, FILE_HEADER_SIZE)?))
}

/// Stamps `id` into an open file and leaves the position after the header.
///
/// # Errors
///
/// Returns an error if the header cannot be written.
pub fn write_header(file: &dyn SequentialFile, id: FileId) -> JournalResult<()> {
    file.set_position(0)?;
    file.write(&encode_header(id), true)?;
    Ok(())
}

/// Erases the header so the file reads as pooled.
///
/// # Errors
///
/// Returns an error if the header cannot be overwritten.
pub fn clear_header(file: &dyn SequentialFile) -> JournalResult<()> {
    file.fill(0, FILE_HEADER_SIZE as u64, 0)?;
    Ok(())
}

/// Bookkeeping for one journal file.
///
/// Other files are referenced by [`FileId`] only. The counters follow the
/// reclaiming rules:
///
/// - `pos_count`: live entries in this file plus one per open transaction
///   touching it
/// - `neg_counts[f]`: entries in this file that killed an entry of file `f`
/// - `live_bytes`: encoded size of the live record entries in this file
#[derive(Debug)]
pub struct JournalFile {
    id: FileId,
    file: Arc<dyn SequentialFile>,
    live_bytes: AtomicI64,
    pos_count: AtomicU32,
    neg_counts: Mutex<HashMap<FileId, u32>>,
    can_reclaim: AtomicBool,
}

impl JournalFile {
    /// Wraps an open file whose header holds `id`.
    #[must_use]
    pub fn new(id: FileId, file: Arc<dyn SequentialFile>) -> Self {
        Self {
            id,
            file,
            live_bytes: AtomicI64::new(0),
            pos_count: AtomicU32::new(0),
            neg_counts: Mutex::new(HashMap::new()),
            can_reclaim: AtomicBool::new(false),
        }
    }

    /// Returns the file ID.
    #[must_use]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Returns the underlying file.
    #[must_use]
    pub fn file(&self) -> &Arc<dyn SequentialFile> {
        &self.file
    }

    /// Returns the file name.
    #[must_use]
    pub fn name(&self) -> String {
        self.file.file_name()
    }

    /// Returns the live-byte count.
    #[must_use]
    pub fn live_bytes(&self) -> i64 {
        self.live_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn add_live(&self, bytes: u32) {
        self.live_bytes.fetch_add(i64::from(bytes), Ordering::SeqCst);
    }

    pub(crate) fn sub_live(&self, bytes: u32) {
        self.live_bytes.fetch_sub(i64::from(bytes), Ordering::SeqCst);
    }

    /// Returns the positive count.
    #[must_use]
    pub fn pos_count(&self) -> u32 {
        self.pos_count.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_pos(&self) {
        self.pos_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dec_pos(&self) {
        // Saturate: a forgotten transaction never drives the count negative.
        let _ = self
            .pos_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Returns how many entries of `target` this file negates.
    #[must_use]
    pub fn neg_count(&self, target: FileId) -> u32 {
        self.neg_counts.lock().get(&target).copied().unwrap_or(0)
    }

    pub(crate) fn inc_neg(&self, target: FileId) {
        *self.neg_counts.lock().entry(target).or_insert(0) += 1;
    }

    /// Returns the files this file negates entries of.
    #[must_use]
    pub fn negated_files(&self) -> Vec<FileId> {
        self.neg_counts.lock().keys().copied().collect()
    }

    pub(crate) fn forget_negations(&self, gone: &dyn Fn(FileId) -> bool) {
        self.neg_counts.lock().retain(|target, _| !gone(*target));
    }

    /// Whether the last reclaim scan found this file reclaimable.
    #[must_use]
    pub fn can_reclaim(&self) -> bool {
        self.can_reclaim.load(Ordering::SeqCst)
    }

    pub(crate) fn set_can_reclaim(&self, value: bool) {
        self.can_reclaim.store(value, Ordering::SeqCst);
    }
}
