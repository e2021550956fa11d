//! Sequential record reader for one journal file.

use crate::error::JournalResult;
use crate::file::{decode_header, FILE_HEADER_SIZE};
use crate::record::{Decoded, JournalRecord};
use crate::types::FileId;
use mqstore_storage::SequentialFile;

/// A record together with its position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Offset of the first byte of the record.
    pub offset: u64,
    /// Encoded size.
    pub size: u32,
    /// The record.
    pub record: JournalRecord,
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Reached zero fill or the end of the file.
    Clean,
    /// Reached a record left over from the file's previous life.
    Stale,
    /// Reached bytes that are not a complete record.
    Torn(&'static str),
}

/// Iterator over the records of a journal file buffer.
///
/// Iteration stops at the first position that does not hold a complete
/// record stamped with the file's own ID. [`end`](Self::end) and
/// [`position`](Self::position) describe where and why.
///
/// # Example
///
/// ```rust
/// use mqstore_journal::{encode_header, FileId, JournalRecord, JournalFileReader};
///
/// let id = FileId::new(1);
/// let mut data = encode_header(id).to_vec();
/// data.extend(JournalRecord::Delete { id: 3 }.encode(id));
/// data.extend([0u8; 16]);
///
/// let mut reader = JournalFileReader::new(&data).unwrap();
/// assert_eq!(reader.next().unwrap().record, JournalRecord::Delete { id: 3 });
/// assert!(reader.next().is_none());
/// ```
pub struct JournalFileReader<'a> {
    data: &'a [u8],
    file_id: FileId,
    position: usize,
    end: Option<ScanEnd>,
}

impl<'a> JournalFileReader<'a> {
    /// Creates a reader over a whole file, header included.
    ///
    /// Returns `None` if the header is missing (a pooled file).
    #[must_use]
    pub fn new(data: &'a [u8]) -> Option<Self> {
        let file_id = decode_header(data)?;
        Some(Self {
            data,
            file_id,
            position: FILE_HEADER_SIZE,
            end: None,
        })
    }

    /// Returns the file ID from the header.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Offset just past the last complete record read so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position as u64
    }

    /// Why iteration stopped, once it has.
    #[must_use]
    pub fn end(&self) -> Option<ScanEnd> {
        self.end
    }
}

impl Iterator for JournalFileReader<'_> {
    type Item = ScannedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        match JournalRecord::decode(&self.data[self.position..]) {
            Decoded::Record {
                record,
                file_id,
                size,
            } => {
                if file_id != self.file_id {
                    self.end = Some(ScanEnd::Stale);
                    return None;
                }
                let scanned = ScannedRecord {
                    offset: self.position as u64,
                    size: size as u32,
                    record,
                };
                self.position += size;
                Some(scanned)
            }
            Decoded::End => {
                self.end = Some(ScanEnd::Clean);
                None
            }
            Decoded::Torn { reason } => {
                self.end = Some(ScanEnd::Torn(reason));
                None
            }
        }
    }
}

/// All records of a file plus where the scan stopped.
#[derive(Debug, Clone)]
pub struct FileScan {
    /// File ID from the header.
    pub file_id: FileId,
    /// Records in file order.
    pub records: Vec<ScannedRecord>,
    /// Offset just past the last complete record.
    pub end_position: u64,
    /// Why the scan stopped.
    pub end: ScanEnd,
}

impl FileScan {
    /// Returns true if the file ends in a torn write.
    #[must_use]
    pub fn is_torn(&self) -> bool {
        matches!(self.end, ScanEnd::Torn(_))
    }
}

/// Reads and scans an open file. Returns `None` for files without a header.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_file(file: &dyn SequentialFile) -> JournalResult<Option<FileScan>> {
    let data = file.read_all()?;
    let Some(mut reader) = JournalFileReader::new(&data) else {
        return Ok(None);
    };
    let records: Vec<ScannedRecord> = reader.by_ref().collect();
    Ok(Some(FileScan {
        file_id: reader.file_id(),
        records,
        end_position: reader.position(),
        end: reader.end().unwrap_or(ScanEnd::Clean),
    }))
}
