//! Journal manifest: the set of data file IDs the journal expects on disk.
//!
//! The manifest is rewritten atomically (temp file, sync, rename) whenever
//! the data file set changes. On load, a listed file that is missing means
//! data loss, not a benign gap.
//!
//! ```text
//! | magic "MQMF" (4) | version u16 | count u32 | file_id u64 * count | crc32 u32 |
//! ```

use crate::error::{JournalError, JournalResult};
use crate::types::FileId;
use mqstore_storage::SequentialFileFactory;

const MANIFEST_MAGIC: [u8; 4] = *b"MQMF";
const MANIFEST_VERSION: u16 = 1;

/// The persisted list of data file IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalManifest {
    /// Data file IDs, ascending.
    pub file_ids: Vec<FileId>,
}

impl JournalManifest {
    /// Creates a manifest from file IDs in any order.
    #[must_use]
    pub fn new(mut file_ids: Vec<FileId>) -> Self {
        file_ids.sort();
        file_ids.dedup();
        Self { file_ids }
    }

    /// Highest listed ID.
    #[must_use]
    pub fn max_id(&self) -> Option<FileId> {
        self.file_ids.last().copied()
    }

    /// Returns true if `id` is listed.
    #[must_use]
    pub fn contains(&self, id: FileId) -> bool {
        self.file_ids.binary_search(&id).is_ok()
    }

    /// Encodes the manifest.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(14 + self.file_ids.len() * 8);
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.file_ids.len() as u32).to_le_bytes());
        for id in &self.file_ids {
            buf.extend_from_slice(&id.as_u64().to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Corruption`] if the bytes are not a manifest.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        if data.len() < 14 || data[0..4] != MANIFEST_MAGIC {
            return Err(JournalError::corruption("manifest has a bad header"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != MANIFEST_VERSION {
            return Err(JournalError::corruption(format!(
                "unsupported manifest version {version}"
            )));
        }
        let count = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let body_len = 10 + count * 8;
        if data.len() != body_len + 4 {
            return Err(JournalError::corruption("manifest length mismatch"));
        }
        let stored = u32::from_le_bytes([
            data[body_len],
            data[body_len + 1],
            data[body_len + 2],
            data[body_len + 3],
        ]);
        if crc32fast::hash(&data[..body_len]) != stored {
            return Err(JournalError::corruption("manifest checksum mismatch"));
        }
        let file_ids = data[10..body_len]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                FileId::new(u64::from_le_bytes(raw))
            })
            .collect();
        Ok(Self { file_ids })
    }

    /// Loads `name` from `factory`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(factory: &dyn SequentialFileFactory, name: &str) -> JournalResult<Option<Self>> {
        let file = factory.create_sequential_file(name, 1);
        if !file.exists() {
            return Ok(None);
        }
        file.open()?;
        let data = file.read_all();
        file.close()?;
        Self::decode(&data?).map(Some)
    }

    /// Atomically replaces `name` in `factory` with this manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if writing, syncing or renaming fails.
    pub fn save(&self, factory: &dyn SequentialFileFactory, name: &str) -> JournalResult<()> {
        let temp_name = format!("{name}.tmp");
        let temp = factory.create_sequential_file(&temp_name, 1);
        temp.open()?;
        temp.truncate(0)?;
        temp.write(&self.encode(), true)?;
        temp.close()?;
        temp.rename_to(name)?;
        Ok(())
    }
}
