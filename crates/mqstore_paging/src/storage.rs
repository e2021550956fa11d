//! Durable paging state.
//!
//! Paging keeps three kinds of journal records:
//!
//! | user type | record | payload |
//! |-----------|--------|---------|
//! | `0x20` | last depaged page of an address | page_id u64, address_len u16, address |
//! | `0x21` | committed page transaction | tx_id u64, remaining u32 |
//! | `0x22` | durable depaged message | page entry encoding |

use crate::error::{PagingError, PagingResult};
use crate::message::{PageEntry, PagedMessage};
use bytes::{Buf, BufMut};
use mqstore_journal::{BatchingIdGenerator, Journal, JournalError, RecordInfo};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// User type of last-page records.
pub const LAST_PAGE_RECORD_TYPE: u8 = 0x20;
/// User type of page transaction records.
pub const PAGE_TRANSACTION_RECORD_TYPE: u8 = 0x21;
/// User type of depaged durable messages.
pub const PAGED_MESSAGE_RECORD_TYPE: u8 = 0x22;

/// The newest page of an address whose messages are in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastPageRecord {
    /// Journal record ID.
    pub record_id: u64,
    /// Page ID.
    pub page_id: u64,
}

/// A committed producer transaction with messages still on pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTransactionInfo {
    /// Producer transaction ID.
    pub tx_id: u64,
    /// Journal record ID.
    pub record_id: u64,
    /// Messages not yet depaged.
    pub remaining: u32,
}

impl PageTransactionInfo {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.put_u64_le(self.tx_id);
        buf.put_u32_le(self.remaining);
        buf
    }

    fn decode(record_id: u64, mut data: &[u8]) -> Option<Self> {
        if data.len() != 12 {
            return None;
        }
        Some(Self {
            tx_id: data.get_u64_le(),
            record_id,
            remaining: data.get_u32_le(),
        })
    }
}

fn encode_last_page(address: &str, page_id: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + address.len());
    buf.put_u64_le(page_id);
    buf.put_u16_le(address.len() as u16);
    buf.put_slice(address.as_bytes());
    buf
}

fn decode_last_page(mut data: &[u8]) -> Option<(String, u64)> {
    if data.len() < 10 {
        return None;
    }
    let page_id = data.get_u64_le();
    let len = usize::from(data.get_u16_le());
    if data.len() != len {
        return None;
    }
    let address = String::from_utf8(data.to_vec()).ok()?;
    Some((address, page_id))
}

/// Everything a depage commits atomically.
#[derive(Debug)]
pub struct DepageCommit<'a> {
    /// Address being depaged.
    pub address: &'a str,
    /// The page that is now fully consumed.
    pub last_page: LastPageRecord,
    /// Messages handed to the listener. Durable ones are persisted.
    pub messages: &'a [PagedMessage],
    /// Page transactions whose remaining count changed. A count of zero
    /// removes the record.
    pub page_transactions: &'a [PageTransactionInfo],
}

/// Durable side of paging.
pub trait PagingStorage: Send + Sync + fmt::Debug {
    /// Returns a fresh record ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID source cannot persist its state.
    fn generate_id(&self) -> PagingResult<u64>;

    /// Persists a committed page transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn store_page_transaction(&self, info: &PageTransactionInfo) -> PagingResult<()>;

    /// Commits a depage in one transaction. Once this returns the page may
    /// be deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be committed; nothing is
    /// applied in that case.
    fn commit_depage(&self, depage: &DepageCommit<'_>) -> PagingResult<()>;

    /// Forgets a durable depaged message after it was consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete cannot be written.
    fn message_done(&self, message_id: u64) -> PagingResult<()>;
}

/// Paging state read back from the journal.
#[derive(Debug, Clone, Default)]
pub struct RecoveredPaging {
    /// Last depaged page per address.
    pub last_pages: HashMap<String, LastPageRecord>,
    /// Committed page transactions with messages still paged.
    pub page_transactions: Vec<PageTransactionInfo>,
    /// Durable depaged messages not yet consumed, ordered by ID.
    pub messages: Vec<PagedMessage>,
}

impl RecoveredPaging {
    /// Picks the paging records out of a loaded journal's records.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::Corruption`] if a paging record does not
    /// decode.
    pub fn from_records(records: &[RecordInfo]) -> PagingResult<Self> {
        let mut recovered = Self::default();
        for record in records {
            match record.user_type {
                LAST_PAGE_RECORD_TYPE => {
                    let (address, page_id) = decode_last_page(&record.data).ok_or_else(|| {
                        PagingError::corruption(format!("bad last-page record {}", record.id))
                    })?;
                    recovered.last_pages.insert(
                        address,
                        LastPageRecord {
                            record_id: record.id,
                            page_id,
                        },
                    );
                }
                PAGE_TRANSACTION_RECORD_TYPE => {
                    let info = PageTransactionInfo::decode(record.id, &record.data).ok_or_else(|| {
                        PagingError::corruption(format!("bad page transaction record {}", record.id))
                    })?;
                    recovered.page_transactions.push(info);
                }
                PAGED_MESSAGE_RECORD_TYPE => match PagedMessage::decode(&record.data) {
                    PageEntry::Message { message, .. } => recovered.messages.push(message),
                    _ => {
                        return Err(PagingError::corruption(format!(
                            "bad paged message record {}",
                            record.id
                        )))
                    }
                },
                _ => {}
            }
        }
        recovered.messages.sort_by_key(|m| m.message_id);
        Ok(recovered)
    }
}

/// [`PagingStorage`] on top of a [`Journal`].
pub struct JournalPagingStorage {
    journal: Arc<Journal>,
    ids: Arc<BatchingIdGenerator>,
}

impl JournalPagingStorage {
    /// Creates a storage writing to `journal` with IDs from `ids`.
    #[must_use]
    pub fn new(journal: Arc<Journal>, ids: Arc<BatchingIdGenerator>) -> Self {
        Self { journal, ids }
    }

    fn write_depage(&self, tx_id: u64, depage: &DepageCommit<'_>) -> PagingResult<()> {
        let journal = &self.journal;
        let last = depage.last_page;
        let payload = encode_last_page(depage.address, last.page_id);
        if journal.contains_record(last.record_id) {
            journal.append_update_record_transactional(tx_id, last.record_id, LAST_PAGE_RECORD_TYPE, &payload)?;
        } else {
            journal.append_add_record_transactional(tx_id, last.record_id, LAST_PAGE_RECORD_TYPE, &payload)?;
        }
        for message in depage.messages.iter().filter(|m| m.durable) {
            journal.append_add_record_transactional(
                tx_id,
                message.message_id,
                PAGED_MESSAGE_RECORD_TYPE,
                &message.encode(),
            )?;
        }
        for info in depage.page_transactions {
            if info.remaining == 0 {
                journal.append_delete_record_transactional(tx_id, info.record_id, &[])?;
            } else {
                journal.append_update_record_transactional(
                    tx_id,
                    info.record_id,
                    PAGE_TRANSACTION_RECORD_TYPE,
                    &info.encode(),
                )?;
            }
        }
        journal.append_commit_record(tx_id, true)?;
        Ok(())
    }
}

impl PagingStorage for JournalPagingStorage {
    fn generate_id(&self) -> PagingResult<u64> {
        Ok(self.ids.generate()?)
    }

    fn store_page_transaction(&self, info: &PageTransactionInfo) -> PagingResult<()> {
        self.journal
            .append_add_record(info.record_id, PAGE_TRANSACTION_RECORD_TYPE, &info.encode(), true)?;
        Ok(())
    }

    fn commit_depage(&self, depage: &DepageCommit<'_>) -> PagingResult<()> {
        let tx_id = self.ids.generate()?;
        if let Err(e) = self.write_depage(tx_id, depage) {
            match self.journal.append_rollback_record(tx_id, false) {
                Ok(()) | Err(JournalError::TransactionNotFound { .. }) => {}
                Err(rollback) => {
                    tracing::warn!(tx_id, error = %rollback, "could not roll back failed depage");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn message_done(&self, message_id: u64) -> PagingResult<()> {
        if self.journal.contains_record(message_id) {
            self.journal.append_delete_record(message_id, false)?;
        }
        Ok(())
    }
}

impl fmt::Debug for JournalPagingStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalPagingStorage")
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_payload() {
        let payload = encode_last_page("queue.orders", 12);
        assert_eq!(decode_last_page(&payload), Some(("queue.orders".to_string(), 12)));
        assert_eq!(decode_last_page(&payload[..payload.len() - 1]), None);
    }

    #[test]
    fn recovers_paging_records() {
        let message = PagedMessage::new(30, true, b"m".to_vec());
        let records = vec![
            RecordInfo {
                id: 1,
                user_type: LAST_PAGE_RECORD_TYPE,
                data: encode_last_page("a", 4),
                is_update: true,
            },
            RecordInfo {
                id: 2,
                user_type: PAGE_TRANSACTION_RECORD_TYPE,
                data: PageTransactionInfo {
                    tx_id: 9,
                    record_id: 2,
                    remaining: 3,
                }
                .encode(),
                is_update: false,
            },
            RecordInfo {
                id: 30,
                user_type: PAGED_MESSAGE_RECORD_TYPE,
                data: message.encode(),
                is_update: false,
            },
            RecordInfo {
                id: 40,
                user_type: 1,
                data: b"not paging".to_vec(),
                is_update: false,
            },
        ];

        let recovered = RecoveredPaging::from_records(&records).unwrap();
        assert_eq!(
            recovered.last_pages.get("a"),
            Some(&LastPageRecord {
                record_id: 1,
                page_id: 4
            })
        );
        assert_eq!(recovered.page_transactions.len(), 1);
        assert_eq!(recovered.page_transactions[0].remaining, 3);
        assert_eq!(recovered.messages, vec![message]);
    }

    #[test]
    fn damaged_record_is_corruption() {
        let records = vec![RecordInfo {
            id: 1,
            user_type: PAGE_TRANSACTION_RECORD_TYPE,
            data: vec![1, 2, 3],
            is_update: false,
        }];
        assert!(matches!(
            RecoveredPaging::from_records(&records),
            Err(PagingError::Corruption { .. })
        ));
    }
}
