//! Property-based test generators using proptest.
//!
//! [`journal_ops_strategy`] produces operation sequences that always respect
//! the journal's contract when replayed through a [`JournalModel`]: the model
//! turns a put into an add or an update and skips deletes of absent records.

use mqstore_journal::{Journal, JournalRecord, JournalResult, LoadedJournal};
use mqstore_paging::PagedMessage;
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

/// One step of a generated journal workload.
#[derive(Debug, Clone)]
pub enum JournalOp {
    /// Add or update `id`.
    Put {
        /// Record ID.
        id: u64,
        /// Caller-defined type.
        user_type: u8,
        /// Payload.
        body: Vec<u8>,
    },
    /// Delete `id` if it is live.
    Delete {
        /// Record ID.
        id: u64,
    },
    /// A transaction touching each ID at most once.
    Transaction {
        /// Puts inside the transaction.
        puts: Vec<(u64, Vec<u8>)>,
        /// Deletes inside the transaction.
        deletes: Vec<u64>,
        /// Commit if true, roll back otherwise.
        commit: bool,
    },
    /// Recycle dead files.
    Reclaim,
}

/// Strategy for record IDs below `max_id`.
pub fn record_id_strategy(max_id: u64) -> impl Strategy<Value = u64> {
    0..max_id
}

/// Strategy for payloads that stay well below one small journal file.
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..300)
}

/// Strategy for a single [`JournalOp`].
pub fn journal_op_strategy(max_id: u64) -> impl Strategy<Value = JournalOp> {
    prop_oneof![
        5 => (record_id_strategy(max_id), 0u8..4, body_strategy())
            .prop_map(|(id, user_type, body)| JournalOp::Put { id, user_type, body }),
        3 => record_id_strategy(max_id).prop_map(|id| JournalOp::Delete { id }),
        2 => (
            prop::collection::vec((record_id_strategy(max_id), body_strategy()), 0..4),
            prop::collection::vec(record_id_strategy(max_id), 0..3),
            any::<bool>(),
        )
            .prop_map(|(puts, deletes, commit)| JournalOp::Transaction { puts, deletes, commit }),
        1 => Just(JournalOp::Reclaim),
    ]
}

/// Strategy for a workload of `len` operations.
pub fn journal_ops_strategy(
    max_id: u64,
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<JournalOp>> {
    prop::collection::vec(journal_op_strategy(max_id), len)
}

/// Strategy for paged messages with IDs starting at `first_id`. IDs are
/// unique and increasing.
pub fn paged_messages_strategy(
    first_id: u64,
    len: std::ops::Range<usize>,
) -> impl Strategy<Value = Vec<PagedMessage>> {
    prop::collection::vec((any::<bool>(), prop::collection::vec(any::<u8>(), 0..200)), len).prop_map(
        move |specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (durable, body))| PagedMessage::new(first_id + i as u64, durable, body))
                .collect()
        },
    )
}

/// What the model expects for one live record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    /// Caller-defined type.
    pub user_type: u8,
    /// Latest payload.
    pub body: Vec<u8>,
    /// Encoded size of the journal record currently holding the payload.
    pub encoded_size: usize,
}

/// Reference model of the journal's live records.
#[derive(Debug, Clone)]
pub struct JournalModel {
    records: BTreeMap<u64, ModelRecord>,
    next_tx: u64,
}

impl Default for JournalModel {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalModel {
    /// An empty model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_tx: 1_000_000,
        }
    }

    /// Applies `op` to `journal` and to the model.
    ///
    /// # Errors
    ///
    /// Returns whatever the journal returns. The model is left unchanged for
    /// the failed operation.
    pub fn apply(&mut self, journal: &Journal, op: &JournalOp) -> JournalResult<()> {
        match op {
            JournalOp::Put { id, user_type, body } => {
                let record = if self.records.contains_key(id) {
                    journal.append_update_record(*id, *user_type, body, false)?;
                    JournalRecord::Update {
                        id: *id,
                        user_type: *user_type,
                        body: body.clone(),
                    }
                } else {
                    journal.append_add_record(*id, *user_type, body, false)?;
                    JournalRecord::Add {
                        id: *id,
                        user_type: *user_type,
                        body: body.clone(),
                    }
                };
                self.put(*id, *user_type, body, &record);
            }
            JournalOp::Delete { id } => {
                if self.records.contains_key(id) {
                    journal.append_delete_record(*id, false)?;
                    self.records.remove(id);
                }
            }
            JournalOp::Transaction { puts, deletes, commit } => {
                self.apply_transaction(journal, puts, deletes, *commit)?;
            }
            JournalOp::Reclaim => {
                journal.reclaim()?;
            }
        }
        Ok(())
    }

    fn apply_transaction(
        &mut self,
        journal: &Journal,
        puts: &[(u64, Vec<u8>)],
        deletes: &[u64],
        commit: bool,
    ) -> JournalResult<()> {
        let tx_id = self.next_tx;
        self.next_tx += 1;

        let mut touched = HashSet::new();
        let mut staged_puts = Vec::new();
        let mut staged_deletes = Vec::new();
        for (id, body) in puts {
            if !touched.insert(*id) {
                continue;
            }
            let record = if self.records.contains_key(id) {
                journal.append_update_record_transactional(tx_id, *id, 0, body)?;
                JournalRecord::UpdateTx {
                    tx_id,
                    id: *id,
                    user_type: 0,
                    body: body.clone(),
                }
            } else {
                journal.append_add_record_transactional(tx_id, *id, 0, body)?;
                JournalRecord::AddTx {
                    tx_id,
                    id: *id,
                    user_type: 0,
                    body: body.clone(),
                }
            };
            staged_puts.push((*id, body.clone(), record));
        }
        for id in deletes {
            if !self.records.contains_key(id) || !touched.insert(*id) {
                continue;
            }
            journal.append_delete_record_transactional(tx_id, *id, &[])?;
            staged_deletes.push(*id);
        }
        if touched.is_empty() {
            return Ok(());
        }

        if !commit {
            return journal.append_rollback_record(tx_id, false);
        }
        journal.append_commit_record(tx_id, false)?;
        for (id, body, record) in staged_puts {
            self.put(id, 0, &body, &record);
        }
        for id in staged_deletes {
            self.records.remove(&id);
        }
        Ok(())
    }

    fn put(&mut self, id: u64, user_type: u8, body: &[u8], record: &JournalRecord) {
        self.records.insert(
            id,
            ModelRecord {
                user_type,
                body: body.to_vec(),
                encoded_size: record.encoded_size(),
            },
        );
    }

    /// Live records by ID.
    #[must_use]
    pub fn records(&self) -> &BTreeMap<u64, ModelRecord> {
        &self.records
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the encoded sizes of the records holding live payloads.
    #[must_use]
    pub fn live_bytes(&self) -> i64 {
        self.records.values().map(|r| r.encoded_size as i64).sum()
    }

    /// Live bytes once compaction has rewritten every record as a plain add.
    #[must_use]
    pub fn compacted_live_bytes(&self) -> i64 {
        self.records
            .iter()
            .map(|(&id, r)| {
                JournalRecord::Add {
                    id,
                    user_type: r.user_type,
                    body: r.body.clone(),
                }
                .encoded_size() as i64
            })
            .sum()
    }

    /// `(id, user_type, body)` triples, ordered by ID.
    #[must_use]
    pub fn expected(&self) -> Vec<(u64, u8, Vec<u8>)> {
        self.records
            .iter()
            .map(|(&id, r)| (id, r.user_type, r.body.clone()))
            .collect()
    }
}

/// `(id, user_type, data)` triples of a loaded journal, ordered by ID.
#[must_use]
pub fn loaded_records(loaded: &LoadedJournal) -> Vec<(u64, u8, Vec<u8>)> {
    let mut records: Vec<_> = loaded
        .records
        .iter()
        .map(|r| (r.id, r.user_type, r.data.clone()))
        .collect();
    records.sort_by_key(|r| r.0);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::JournalFixture;

    #[test]
    fn model_skips_absent_deletes() {
        let fixture = JournalFixture::new();
        let (journal, _) = fixture.open();
        let mut model = JournalModel::new();
        model.apply(&journal, &JournalOp::Delete { id: 4 }).unwrap();
        model
            .apply(
                &journal,
                &JournalOp::Put {
                    id: 4,
                    user_type: 1,
                    body: b"four".to_vec(),
                },
            )
            .unwrap();
        model
            .apply(
                &journal,
                &JournalOp::Put {
                    id: 4,
                    user_type: 2,
                    body: b"four again".to_vec(),
                },
            )
            .unwrap();
        assert_eq!(model.expected(), vec![(4, 2, b"four again".to_vec())]);
        assert_eq!(journal.record_count(), 1);
    }

    #[test]
    fn rolled_back_transaction_changes_nothing() {
        let fixture = JournalFixture::new();
        let (journal, _) = fixture.open();
        let mut model = JournalModel::new();
        let op = JournalOp::Transaction {
            puts: vec![(1, b"a".to_vec()), (1, b"dup".to_vec()), (2, b"b".to_vec())],
            deletes: vec![3],
            commit: false,
        };
        model.apply(&journal, &op).unwrap();
        assert!(model.is_empty());
        assert_eq!(journal.record_count(), 0);
        assert!(journal.pending_transactions().is_empty());
    }

    proptest! {
        #[test]
        fn generated_messages_have_increasing_ids(messages in paged_messages_strategy(10, 1..20)) {
            for pair in messages.windows(2) {
                prop_assert_eq!(pair[1].message_id, pair[0].message_id + 1);
            }
            prop_assert_eq!(messages[0].message_id, 10);
        }
    }
}
