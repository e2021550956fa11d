//! Compaction control file.
//!
//! Written after the compacted files are complete and synced, and before
//! anything is renamed or deleted. Its presence on load means a compaction
//! was interrupted between the two and must be finished.
//!
//! ```text
//! | magic "MQCC" (4) | version u16 |
//! | old_count u32 | (file_id u64, name_len u16, name)* |
//! | new_count u32 | (file_id u64, name_len u16, name)* |
//! | crc32 u32 |
//! ```
//!
//! A control file that fails to decode was cut short while being written,
//! which means no rename had started yet.

use crate::error::JournalResult;
use crate::types::FileId;
use mqstore_storage::SequentialFileFactory;

const CONTROL_MAGIC: [u8; 4] = *b"MQCC";
const CONTROL_VERSION: u16 = 1;

/// A file listed in the control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEntry {
    /// Header ID of the file.
    pub file_id: FileId,
    /// Final file name (compacted files are written as `<name>.cmp`).
    pub name: String,
}

/// Old and new file sets of one compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFile {
    /// Files being replaced.
    pub old_files: Vec<ControlEntry>,
    /// Files replacing them.
    pub new_files: Vec<ControlEntry>,
}

impl ControlFile {
    /// Encodes the control file.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&CONTROL_MAGIC);
        buf.extend_from_slice(&CONTROL_VERSION.to_le_bytes());
        for list in [&self.old_files, &self.new_files] {
            buf.extend_from_slice(&(list.len() as u32).to_le_bytes());
            for entry in list {
                buf.extend_from_slice(&entry.file_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
                buf.extend_from_slice(entry.name.as_bytes());
            }
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a control file, returning `None` for partial or damaged input.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 10 || data[0..4] != CONTROL_MAGIC {
            return None;
        }
        let (body, crc) = data.split_at(data.len() - 4);
        if crc32fast::hash(body) != u32::from_le_bytes(crc.try_into().ok()?) {
            return None;
        }
        if u16::from_le_bytes([body[4], body[5]]) != CONTROL_VERSION {
            return None;
        }
        let mut pos = 6;
        let old_files = decode_list(body, &mut pos)?;
        let new_files = decode_list(body, &mut pos)?;
        (pos == body.len()).then_some(Self {
            old_files,
            new_files,
        })
    }

    /// Reads `name`.
    ///
    /// Returns `Ok(None)` if the file is absent, and `Ok(Some(None))` if it
    /// exists but is incomplete.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read(factory: &dyn SequentialFileFactory, name: &str) -> JournalResult<Option<Option<Self>>> {
        let file = factory.create_sequential_file(name, 1);
        if !file.exists() {
            return Ok(None);
        }
        file.open()?;
        let data = file.read_all();
        file.close()?;
        Ok(Some(Self::decode(&data?)))
    }

    /// Writes and syncs `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn write(&self, factory: &dyn SequentialFileFactory, name: &str) -> JournalResult<()> {
        let file = factory.create_sequential_file(name, 1);
        file.open()?;
        file.truncate(0)?;
        file.write(&self.encode(), true)?;
        file.close()?;
        Ok(())
    }

    /// Deletes `name` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be deleted.
    pub fn delete(factory: &dyn SequentialFileFactory, name: &str) -> JournalResult<()> {
        factory.create_sequential_file(name, 1).delete()?;
        Ok(())
    }
}

fn decode_list(body: &[u8], pos: &mut usize) -> Option<Vec<ControlEntry>> {
    let count = u32::from_le_bytes(body.get(*pos..*pos + 4)?.try_into().ok()?) as usize;
    *pos += 4;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let file_id = u64::from_le_bytes(body.get(*pos..*pos + 8)?.try_into().ok()?);
        *pos += 8;
        let len = u16::from_le_bytes(body.get(*pos..*pos + 2)?.try_into().ok()?) as usize;
        *pos += 2;
        let name = std::str::from_utf8(body.get(*pos..*pos + len)?).ok()?.to_string();
        *pos += len;
        entries.push(ControlEntry {
            file_id: FileId::new(file_id),
            name,
        });
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqstore_storage::InMemoryFileFactory;

    fn sample() -> ControlFile {
        ControlFile {
            old_files: vec![
                ControlEntry {
                    file_id: FileId::new(1),
                    name: "mq-data-1.mqj".into(),
                },
                ControlEntry {
                    file_id: FileId::new(2),
                    name: "mq-data-2.mqj".into(),
                },
            ],
            new_files: vec![ControlEntry {
                file_id: FileId::new(10),
                name: "mq-data-7.mqj".into(),
            }],
        }
    }

    #[test]
    fn write_read_delete() {
        let factory = InMemoryFileFactory::new();
        assert_eq!(ControlFile::read(&factory, "c.ctl").unwrap(), None);

        sample().write(&factory, "c.ctl").unwrap();
        assert_eq!(
            ControlFile::read(&factory, "c.ctl").unwrap(),
            Some(Some(sample()))
        );

        ControlFile::delete(&factory, "c.ctl").unwrap();
        assert_eq!(ControlFile::read(&factory, "c.ctl").unwrap(), None);
    }

    #[test]
    fn every_prefix_is_rejected() {
        let bytes = sample().encode();
        for cut in 0..bytes.len() {
            assert_eq!(ControlFile::decode(&bytes[..cut]), None, "prefix {cut}");
        }
        assert_eq!(ControlFile::decode(&bytes), Some(sample()));
    }
}
