//! Journal record encoding.
//!
//! # Record Format
//!
//! Every record starts with a kind byte and the ID of the file it was
//! written to, and ends with a CRC32 of all preceding bytes followed by the
//! total record size:
//!
//! ```text
//! | kind (1) | file_id (8) | kind-specific fields | crc32 (4) | size (4) |
//! ```
//!
//! | kind | fields |
//! |------|--------|
//! | ADD, UPDATE | record_id u64, user_type u8, body_len u32, body |
//! | DELETE | record_id u64 |
//! | ADD_TX, UPDATE_TX | tx_id u64, record_id u64, user_type u8, body_len u32, body |
//! | DELETE_TX | tx_id u64, record_id u64, body_len u32, body |
//! | PREPARE | tx_id u64, record_count u32, body_len u32, body |
//! | COMMIT | tx_id u64, record_count u32 |
//! | ROLLBACK | tx_id u64 |
//!
//! Journal files are zero-filled, so a zero kind byte marks the end of the
//! written region. A record that is cut short or fails its checksum is a
//! torn write.

use crate::types::FileId;
use bytes::BufMut;

/// Bytes before the kind-specific fields.
pub const RECORD_PREFIX_SIZE: usize = 1 + 8;

/// Bytes after the kind-specific fields.
pub const RECORD_TRAILER_SIZE: usize = 4 + 4;

/// Record kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Non-transactional add.
    Add = 11,
    /// Non-transactional update.
    Update = 12,
    /// Transactional add.
    AddTx = 13,
    /// Transactional update.
    UpdateTx = 14,
    /// Transactional delete.
    DeleteTx = 15,
    /// Non-transactional delete.
    Delete = 16,
    /// Two-phase prepare.
    Prepare = 17,
    /// Transaction commit.
    Commit = 18,
    /// Transaction rollback.
    Rollback = 19,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            11 => Some(Self::Add),
            12 => Some(Self::Update),
            13 => Some(Self::AddTx),
            14 => Some(Self::UpdateTx),
            15 => Some(Self::DeleteTx),
            16 => Some(Self::Delete),
            17 => Some(Self::Prepare),
            18 => Some(Self::Commit),
            19 => Some(Self::Rollback),
            _ => None,
        }
    }

    /// Returns the byte representation.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Adds a record.
    Add {
        /// Record ID.
        id: u64,
        /// Caller-defined type.
        user_type: u8,
        /// Payload.
        body: Vec<u8>,
    },
    /// Replaces a record's payload.
    Update {
        /// Record ID.
        id: u64,
        /// Caller-defined type.
        user_type: u8,
        /// Payload.
        body: Vec<u8>,
    },
    /// Deletes a record.
    Delete {
        /// Record ID.
        id: u64,
    },
    /// Adds a record inside a transaction.
    AddTx {
        /// Transaction ID.
        tx_id: u64,
        /// Record ID.
        id: u64,
        /// Caller-defined type.
        user_type: u8,
        /// Payload.
        body: Vec<u8>,
    },
    /// Replaces a record's payload inside a transaction.
    UpdateTx {
        /// Transaction ID.
        tx_id: u64,
        /// Record ID.
        id: u64,
        /// Caller-defined type.
        user_type: u8,
        /// Payload.
        body: Vec<u8>,
    },
    /// Deletes a record inside a transaction.
    DeleteTx {
        /// Transaction ID.
        tx_id: u64,
        /// Record ID.
        id: u64,
        /// Caller-defined payload.
        body: Vec<u8>,
    },
    /// Prepares a transaction.
    Prepare {
        /// Transaction ID.
        tx_id: u64,
        /// Records of this transaction in the same file.
        record_count: u32,
        /// Caller-defined data, e.g. an XA xid.
        extra: Vec<u8>,
    },
    /// Commits a transaction.
    Commit {
        /// Transaction ID.
        tx_id: u64,
        /// Records of this transaction in the same file.
        record_count: u32,
    },
    /// Rolls back a transaction.
    Rollback {
        /// Transaction ID.
        tx_id: u64,
    },
}

/// Outcome of decoding at one offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, checksummed record.
    Record {
        /// The record.
        record: JournalRecord,
        /// File ID stamped into the record.
        file_id: FileId,
        /// Encoded size.
        size: usize,
    },
    /// Zero fill: nothing was written here.
    End,
    /// Bytes that are not a complete record.
    Torn {
        /// Why decoding stopped.
        reason: &'static str,
    },
}

impl JournalRecord {
    /// Returns the kind tag.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Add { .. } => RecordKind::Add,
            Self::Update { .. } => RecordKind::Update,
            Self::Delete { .. } => RecordKind::Delete,
            Self::AddTx { .. } => RecordKind::AddTx,
            Self::UpdateTx { .. } => RecordKind::UpdateTx,
            Self::DeleteTx { .. } => RecordKind::DeleteTx,
            Self::Prepare { .. } => RecordKind::Prepare,
            Self::Commit { .. } => RecordKind::Commit,
            Self::Rollback { .. } => RecordKind::Rollback,
        }
    }

    /// Returns the transaction ID for transactional kinds.
    #[must_use]
    pub fn tx_id(&self) -> Option<u64> {
        match self {
            Self::AddTx { tx_id, .. }
            | Self::UpdateTx { tx_id, .. }
            | Self::DeleteTx { tx_id, .. }
            | Self::Prepare { tx_id, .. }
            | Self::Commit { tx_id, .. }
            | Self::Rollback { tx_id } => Some(*tx_id),
            _ => None,
        }
    }

    /// Returns the record ID for kinds that carry one.
    #[must_use]
    pub fn record_id(&self) -> Option<u64> {
        match self {
            Self::Add { id, .. }
            | Self::Update { id, .. }
            | Self::Delete { id }
            | Self::AddTx { id, .. }
            | Self::UpdateTx { id, .. }
            | Self::DeleteTx { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns the exact encoded size.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let body = match self {
            Self::Add { body, .. } | Self::Update { body, .. } => 8 + 1 + 4 + body.len(),
            Self::Delete { .. } => 8,
            Self::AddTx { body, .. } | Self::UpdateTx { body, .. } => 8 + 8 + 1 + 4 + body.len(),
            Self::DeleteTx { body, .. } => 8 + 8 + 4 + body.len(),
            Self::Prepare { extra, .. } => 8 + 4 + 4 + extra.len(),
            Self::Commit { .. } => 8 + 4,
            Self::Rollback { .. } => 8,
        };
        RECORD_PREFIX_SIZE + body + RECORD_TRAILER_SIZE
    }

    /// Encodes the record stamped with `file_id`.
    #[must_use]
    pub fn encode(&self, file_id: FileId) -> Vec<u8> {
        let size = self.encoded_size();
        let mut buf = Vec::with_capacity(size);
        buf.put_u8(self.kind().as_byte());
        buf.put_u64_le(file_id.as_u64());

        match self {
            Self::Add {
                id,
                user_type,
                body,
            }
            | Self::Update {
                id,
                user_type,
                body,
            } => {
                buf.put_u64_le(*id);
                buf.put_u8(*user_type);
                put_body(&mut buf, body);
            }
            Self::Delete { id } => buf.put_u64_le(*id),
            Self::AddTx {
                tx_id,
                id,
                user_type,
                body,
            }
            | Self::UpdateTx {
                tx_id,
                id,
                user_type,
                body,
            } => {
                buf.put_u64_le(*tx_id);
                buf.put_u64_le(*id);
                buf.put_u8(*user_type);
                put_body(&mut buf, body);
            }
            Self::DeleteTx { tx_id, id, body } => {
                buf.put_u64_le(*tx_id);
                buf.put_u64_le(*id);
                put_body(&mut buf, body);
            }
            Self::Prepare {
                tx_id,
                record_count,
                extra,
            } => {
                buf.put_u64_le(*tx_id);
                buf.put_u32_le(*record_count);
                put_body(&mut buf, extra);
            }
            Self::Commit {
                tx_id,
                record_count,
            } => {
                buf.put_u64_le(*tx_id);
                buf.put_u32_le(*record_count);
            }
            Self::Rollback { tx_id } => buf.put_u64_le(*tx_id),
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf.put_u32_le(size as u32);
        debug_assert_eq!(buf.len(), size);
        buf
    }

    /// Decodes the record starting at the beginning of `data`.
    ///
    /// Never fails: damaged or partial input yields [`Decoded::Torn`].
    #[must_use]
    pub fn decode(data: &[u8]) -> Decoded {
        let Some(&kind_byte) = data.first() else {
            return Decoded::End;
        };
        if kind_byte == 0 {
            return Decoded::End;
        }
        let Some(kind) = RecordKind::from_byte(kind_byte) else {
            return Decoded::Torn {
                reason: "unknown record kind",
            };
        };

        let mut cursor = Cursor { data, pos: 1 };
        match Self::decode_fields(kind, &mut cursor) {
            Some((file_id, record)) => {
                let body_end = cursor.pos;
                let Some(crc) = cursor.u32() else {
                    return Decoded::Torn {
                        reason: "truncated checksum",
                    };
                };
                let Some(size) = cursor.u32() else {
                    return Decoded::Torn {
                        reason: "truncated size",
                    };
                };
                if crc32fast::hash(&data[..body_end]) != crc {
                    return Decoded::Torn {
                        reason: "checksum mismatch",
                    };
                }
                if size as usize != cursor.pos {
                    return Decoded::Torn {
                        reason: "size mismatch",
                    };
                }
                Decoded::Record {
                    record,
                    file_id,
                    size: cursor.pos,
                }
            }
            None => Decoded::Torn {
                reason: "truncated record",
            },
        }
    }

    fn decode_fields(kind: RecordKind, c: &mut Cursor<'_>) -> Option<(FileId, Self)> {
        let file_id = FileId::new(c.u64()?);
        let record = match kind {
            RecordKind::Add | RecordKind::Update => {
                let id = c.u64()?;
                let user_type = c.u8()?;
                let body = c.body()?;
                if kind == RecordKind::Add {
                    Self::Add {
                        id,
                        user_type,
                        body,
                    }
                } else {
                    Self::Update {
                        id,
                        user_type,
                        body,
                    }
                }
            }
            RecordKind::Delete => Self::Delete { id: c.u64()? },
            RecordKind::AddTx | RecordKind::UpdateTx => {
                let tx_id = c.u64()?;
                let id = c.u64()?;
                let user_type = c.u8()?;
                let body = c.body()?;
                if kind == RecordKind::AddTx {
                    Self::AddTx {
                        tx_id,
                        id,
                        user_type,
                        body,
                    }
                } else {
                    Self::UpdateTx {
                        tx_id,
                        id,
                        user_type,
                        body,
                    }
                }
            }
            RecordKind::DeleteTx => Self::DeleteTx {
                tx_id: c.u64()?,
                id: c.u64()?,
                body: c.body()?,
            },
            RecordKind::Prepare => Self::Prepare {
                tx_id: c.u64()?,
                record_count: c.u32()?,
                extra: c.body()?,
            },
            RecordKind::Commit => Self::Commit {
                tx_id: c.u64()?,
                record_count: c.u32()?,
            },
            RecordKind::Rollback => Self::Rollback { tx_id: c.u64()? },
        };
        Some((file_id, record))
    }
}

fn put_body(buf: &mut Vec<u8>, body: &[u8]) {
    buf.put_u32_le(body.len() as u32);
    buf.put_slice(body);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        let bytes = self.take(4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        let bytes = self.take(8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    fn body(&mut self) -> Option<Vec<u8>> {
        let len = self.u32()? as usize;
        self.take(len).map(<[u8]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn samples() -> Vec<JournalRecord> {
        vec![
            JournalRecord::Add {
                id: 1,
                user_type: 3,
                body: b"hello".to_vec(),
            },
            JournalRecord::Update {
                id: 1,
                user_type: 3,
                body: vec![],
            },
            JournalRecord::Delete { id: 9 },
            JournalRecord::AddTx {
                tx_id: 7,
                id: 2,
                user_type: 1,
                body: vec![0xAB; 40],
            },
            JournalRecord::DeleteTx {
                tx_id: 7,
                id: 1,
                body: vec![],
            },
            JournalRecord::Prepare {
                tx_id: 7,
                record_count: 2,
                extra: b"xid".to_vec(),
            },
            JournalRecord::Commit {
                tx_id: 7,
                record_count: 2,
            },
            JournalRecord::Rollback { tx_id: 8 },
        ]
    }

    #[test]
    fn every_kind_decodes() {
        for record in samples() {
            let bytes = record.encode(FileId::new(42));
            assert_eq!(bytes.len(), record.encoded_size());
            match JournalRecord::decode(&bytes) {
                Decoded::Record {
                    record: decoded,
                    file_id,
                    size,
                } => {
                    assert_eq!(decoded, record);
                    assert_eq!(file_id, FileId::new(42));
                    assert_eq!(size, bytes.len());
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn kind_bytes_are_stable() {
        assert_eq!(RecordKind::Add.as_byte(), 11);
        assert_eq!(RecordKind::Delete.as_byte(), 16);
        assert_eq!(RecordKind::Rollback.as_byte(), 19);
        assert_eq!(RecordKind::from_byte(15), Some(RecordKind::DeleteTx));
        assert_eq!(RecordKind::from_byte(0), None);
    }

    #[test]
    fn zero_fill_is_end() {
        assert_eq!(JournalRecord::decode(&[0u8; 32]), Decoded::End);
        assert_eq!(JournalRecord::decode(&[]), Decoded::End);
    }

    #[test]
    fn flipped_byte_is_torn() {
        let mut bytes = samples()[0].encode(FileId::new(1));
        bytes[12] ^= 0xFF;
        assert!(matches!(
            JournalRecord::decode(&bytes),
            Decoded::Torn {
                reason: "checksum mismatch"
            }
        ));
    }

    #[test]
    fn record_followed_by_more_data_decodes_alone() {
        let first = samples()[2].encode(FileId::new(1));
        let mut bytes = first.clone();
        bytes.extend(samples()[0].encode(FileId::new(1)));
        match JournalRecord::decode(&bytes) {
            Decoded::Record { size, .. } => assert_eq!(size, first.len()),
            other => panic!("unexpected {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn every_prefix_is_torn(body in proptest::collection::vec(any::<u8>(), 0..64), cut in 1usize..200) {
            let record = JournalRecord::AddTx { tx_id: 5, id: 6, user_type: 2, body };
            let bytes = record.encode(FileId::new(3));
            let cut = cut.min(bytes.len() - 1);
            let decoded = JournalRecord::decode(&bytes[..cut]);
            prop_assert!(
                matches!(decoded, Decoded::Torn { .. }),
                "prefix of {} bytes decoded as {:?}",
                cut,
                decoded
            );
        }
    }
}
