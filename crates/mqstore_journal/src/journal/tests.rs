use super::*;
use crate::compactor::{CompactionResult, COMPACT_SUFFIX};
use crate::file::FILE_HEADER_SIZE;
use crate::types::{LoadedJournal, RecordInfo};
use mqstore_storage::InMemoryFileFactory;
use proptest::prelude::*;
use std::collections::HashMap;

const FILE_SIZE: u64 = 4096;

fn config() -> JournalConfig {
    JournalConfig::new()
        .file_size(FILE_SIZE)
        .min_files(2)
        .auto_reclaim(false)
}

fn open(factory: &InMemoryFileFactory, config: JournalConfig) -> Arc<Journal> {
    Journal::open(config, Arc::new(factory.clone())).unwrap()
}

fn reopen(factory: &InMemoryFileFactory) -> (Arc<Journal>, LoadedJournal) {
    let journal = open(factory, config());
    let loaded = journal.load().unwrap();
    (journal, loaded)
}

fn payload(id: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (id as usize + i) as u8).collect()
}

/// Runs `action` the first time a candidate file has been copied.
struct MidCopy<F> {
    fired: AtomicBool,
    action: F,
}

impl<F: Fn() + Send + Sync> CompactionListener for MidCopy<F> {
    fn on_phase(&self, phase: CompactionPhase) {
        if matches!(phase, CompactionPhase::FileCompacted(_)) && !self.fired.swap(true, Ordering::SeqCst) {
            (self.action)();
        }
    }
}

#[test]
fn operations_require_load() {
    let factory = InMemoryFileFactory::new();
    let journal = open(&factory, config());
    let err = journal.append_add_record(1, 0, b"x", false).unwrap_err();
    assert!(matches!(err, JournalError::InvalidState { .. }));

    journal.load().unwrap();
    assert!(journal.is_loaded());
    assert!(journal.load().is_err());

    journal.stop().unwrap();
    journal.stop().unwrap();
    let err = journal.append_add_record(1, 0, b"x", false).unwrap_err();
    assert!(matches!(err, JournalError::InvalidState { .. }));
}

#[test]
fn records_survive_restart() {
    let factory = InMemoryFileFactory::new();
    {
        let (journal, loaded) = reopen(&factory);
        assert!(loaded.records.is_empty());
        journal.append_add_record(1, 3, b"one", false).unwrap();
        journal.append_add_record(2, 3, b"two", false).unwrap();
        journal.append_add_record(3, 3, b"three", true).unwrap();
        journal.append_update_record(2, 4, b"two again", false).unwrap();
        journal.append_delete_record(3, true).unwrap();
        journal.stop().unwrap();
    }

    let (_journal, loaded) = reopen(&factory);
    assert_eq!(
        loaded.records,
        vec![
            RecordInfo {
                id: 1,
                user_type: 3,
                data: b"one".to_vec(),
                is_update: false,
            },
            RecordInfo {
                id: 2,
                user_type: 4,
                data: b"two again".to_vec(),
                is_update: true,
            },
        ]
    );
}

#[test]
fn contract_violations_are_reported() {
    let factory = InMemoryFileFactory::new();
    let (journal, _) = reopen(&factory);
    journal.append_add_record(1, 0, b"x", false).unwrap();

    let err = journal.append_add_record(1, 0, b"y", false).unwrap_err();
    assert!(matches!(err, JournalError::DuplicateRecord { id: 1 }));
    assert!(err.is_contract_violation());

    let err = journal.append_update_record(2, 0, b"y", false).unwrap_err();
    assert!(matches!(err, JournalError::RecordNotFound { id: 2 }));

    let err = journal.append_delete_record(2, false).unwrap_err();
    assert!(matches!(err, JournalError::RecordNotFound { id: 2 }));

    let err = journal.append_update_record_transactional(5, 2, 0, b"y").unwrap_err();
    assert!(matches!(err, JournalError::RecordNotFound { id: 2 }));

    let err = journal.append_commit_record(77, false).unwrap_err();
    assert!(matches!(err, JournalError::TransactionNotFound { tx_id: 77 }));

    let err = journal
        .append_add_record(9, 0, &vec![0; FILE_SIZE as usize], false)
        .unwrap_err();
    assert!(matches!(err, JournalError::RecordTooLarge { .. }));
    assert!(!journal.contains_record(9));
}

#[test]
fn torn_tail_is_truncated() {
    let factory = InMemoryFileFactory::new();
    {
        let (journal, _) = reopen(&factory);
        for id in 1..=10 {
            journal.append_add_record(id, 0, &payload(id, 100), false).unwrap();
        }
        journal.stop().unwrap();
    }

    // ADD with a 100 byte body encodes to 130 bytes; damage the tenth.
    let name = "mq-data-1.mqj";
    let mut data = factory.file_data(name).unwrap();
    data[FILE_HEADER_SIZE + 9 * 130 + 50] ^= 0xFF;
    factory.set_file_data(name, data);

    {
        let (journal, loaded) = reopen(&factory);
        assert_eq!(loaded.stats.torn_tails, 1);
        let ids: Vec<u64> = loaded.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=9).collect::<Vec<_>>());
        journal.append_add_record(11, 0, b"after", true).unwrap();
        journal.stop().unwrap();
    }

    let (_journal, loaded) = reopen(&factory);
    assert_eq!(loaded.stats.torn_tails, 0);
    let ids: Vec<u64> = loaded.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);
}

#[test]
fn missing_listed_file_fails_load() {
    let factory = InMemoryFileFactory::new();
    {
        let (journal, _) = reopen(&factory);
        for id in 1..=40 {
            journal.append_add_record(id, 0, &payload(id, 100), false).unwrap();
        }
        assert!(journal.stats().data_files >= 1);
        journal.stop().unwrap();
    }
    assert!(factory.remove_file("mq-data-1.mqj"));

    let journal = open(&factory, config());
    let err = journal.load().unwrap_err();
    assert!(matches!(err, JournalError::MissingFile { file_id } if file_id == FileId::new(1)));
    assert!(!journal.is_loaded());
}

#[test]
fn dead_files_are_reclaimed() {
    let factory = InMemoryFileFactory::new();
    let (journal, _) = reopen(&factory);
    for id in 0..100 {
        journal.append_add_record(id, 0, &payload(id, 100), false).unwrap();
    }
    for id in 0..100 {
        journal.append_delete_record(id, false).unwrap();
    }
    journal.flush_background();
    let before = journal.stats();
    assert!(before.data_files >= 3);

    let reclaimed = journal.reclaim().unwrap();
    assert!(reclaimed >= 3);
    let after = journal.stats();
    assert_eq!(after.data_files, before.data_files - reclaimed);
    assert_eq!(after.files_reclaimed, reclaimed as u64);
    assert_eq!(journal.reclaim().unwrap(), 0);
    journal.stop().unwrap();

    let (_journal, loaded) = reopen(&factory);
    assert!(loaded.records.is_empty());
}

#[test]
fn reclaimed_files_return_to_pool_below_min_files() {
    let factory = InMemoryFileFactory::new();
    let journal = open(&factory, config().min_files(10));
    journal.load().unwrap();
    for id in 0..100 {
        journal.append_add_record(id, 0, &payload(id, 100), false).unwrap();
    }
    for id in 0..100 {
        journal.append_delete_record(id, false).unwrap();
    }
    journal.flush_background();
    let before = journal.stats();

    let reclaimed = journal.reclaim().unwrap();
    assert!(reclaimed > 0);
    let after = journal.stats();
    assert_eq!(after.free_files, before.free_files + reclaimed);
}

#[test]
fn live_bytes_match_live_records() {
    let factory = InMemoryFileFactory::new();
    let (journal, _) = reopen(&factory);
    let mut expected: HashMap<u64, usize> = HashMap::new();
    for id in 0..60 {
        let len = (id as usize * 7) % 150;
        journal.append_add_record(id, 0, &payload(id, len), false).unwrap();
        expected.insert(id, len);
    }
    for id in (0..60).step_by(3) {
        journal.append_update_record(id, 0, &payload(id, 10), false).unwrap();
        expected.insert(id, 10);
    }
    for id in (0..60).step_by(4) {
        journal.append_delete_record(id, false).unwrap();
        expected.remove(&id);
    }

    // Plain ADD/UPDATE overhead: prefix, id, user type, length, trailer.
    let encoded = |len: usize| (9 + 8 + 1 + 4 + len + 8) as i64;
    let want: i64 = expected.values().map(|&len| encoded(len)).sum();
    assert_eq!(journal.stats().live_bytes, want);
    assert_eq!(journal.record_count(), expected.len());
    journal.stop().unwrap();

    let (journal, _) = reopen(&factory);
    assert_eq!(journal.stats().live_bytes, want);
}

#[test]
fn transactions_apply_on_commit_only() {
    let factory = InMemoryFileFactory::new();
    {
        let (journal, _) = reopen(&factory);
        journal.append_add_record_transactional(1, 10, 0, b"a").unwrap();
        journal.append_add_record_transactional(1, 11, 0, b"b").unwrap();
        journal.append_update_record_transactional(1, 11, 0, b"b2").unwrap();
        assert!(!journal.contains_record(10));
        assert_eq!(journal.pending_transactions(), vec![1]);
        journal.append_commit_record(1, false).unwrap();
        assert!(journal.contains_record(10));
        assert!(journal.contains_record(11));

        journal.append_add_record_transactional(2, 12, 0, b"c").unwrap();
        journal.append_rollback_record(2, false).unwrap();
        assert!(!journal.contains_record(12));

        // Never completed.
        journal.append_add_record_transactional(3, 13, 0, b"d").unwrap();

        let stats = journal.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.pending_transactions, 1);
        journal.stop().unwrap();
    }

    let (journal, loaded) = reopen(&factory);
    let ids: Vec<u64> = loaded.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(loaded.records[1].data, b"b2");
    assert_eq!(loaded.stats.discarded_transactions, 1);
    assert!(loaded.prepared.is_empty());
    assert!(journal.pending_transactions().is_empty());
}

#[test]
fn prepared_transaction_survives_restart() {
    let factory = InMemoryFileFactory::new();
    {
        let (journal, _) = reopen(&factory);
        journal.append_add_record(1, 0, b"old", false).unwrap();
        journal.append_add_record_transactional(7, 20, 5, b"new").unwrap();
        journal.append_delete_record_transactional(7, 1, b"ack").unwrap();
        journal.append_prepare_record(7, b"xid-7", true).unwrap();
        journal.stop().unwrap();
    }

    {
        let (journal, loaded) = reopen(&factory);
        assert_eq!(loaded.prepared.len(), 1);
        let prepared = &loaded.prepared[0];
        assert_eq!(prepared.tx_id, 7);
        assert_eq!(prepared.extra_data, b"xid-7");
        assert_eq!(prepared.records.len(), 1);
        assert_eq!(prepared.records[0].id, 20);
        assert_eq!(prepared.records_to_delete.len(), 1);
        assert_eq!(prepared.records_to_delete[0].id, 1);
        assert_eq!(prepared.records_to_delete[0].data, b"ack");
        assert_eq!(journal.pending_transactions(), vec![7]);
        assert!(journal.contains_record(1));

        journal.append_commit_record(7, true).unwrap();
        assert!(journal.contains_record(20));
        assert!(!journal.contains_record(1));
        journal.stop().unwrap();
    }

    let (_journal, loaded) = reopen(&factory);
    assert!(loaded.prepared.is_empty());
    let ids: Vec<u64> = loaded.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![20]);
}

fn fill_mostly_dead(journal: &Journal) -> HashMap<u64, Vec<u8>> {
    let mut live = HashMap::new();
    for id in 0..200 {
        let data = payload(id, 100);
        journal.append_add_record(id, 1, &data, false).unwrap();
        live.insert(id, data);
    }
    for id in (0..200).filter(|id| id % 10 != 0) {
        journal.append_delete_record(id, false).unwrap();
        live.remove(&id);
    }
    live
}

fn assert_records(loaded: &LoadedJournal, expected: &HashMap<u64, Vec<u8>>) {
    assert_eq!(loaded.records.len(), expected.len());
    for record in &loaded.records {
        assert_eq!(Some(&record.data), expected.get(&record.id), "record {}", record.id);
    }
}

#[test]
fn compaction_keeps_live_records() {
    let factory = InMemoryFileFactory::new();
    let expected;
    {
        let (journal, _) = reopen(&factory);
        expected = fill_mostly_dead(&journal);
        journal.flush_background();
        let before = journal.stats();

        let result = journal.compact().unwrap();
        assert!(result.compacted_files > 0);
        assert!(result.output_files < result.compacted_files);
        assert_eq!(result.records_copied, expected.len());
        assert!(!journal.is_compacting());

        let after = journal.stats();
        assert!(after.data_files < before.data_files);
        assert_eq!(after.compactions, 1);
        assert_eq!(journal.record_count(), expected.len());
        assert!(factory.list_files(COMPACT_SUFFIX).unwrap().is_empty());
        journal.stop().unwrap();
    }

    let (journal, loaded) = reopen(&factory);
    assert!(!loaded.stats.compaction_recovered);
    assert_records(&loaded, &expected);
    journal.append_add_record(1000, 0, b"later", false).unwrap();
}

#[test]
fn mutations_during_compaction_win() {
    let factory = InMemoryFileFactory::new();
    let mut expected;
    {
        let (journal, _) = reopen(&factory);
        journal.append_add_record_transactional(900, 5000, 2, b"pending").unwrap();
        expected = fill_mostly_dead(&journal);

        let weak = Arc::downgrade(&journal);
        journal.set_compaction_listener(Some(Arc::new(MidCopy {
            fired: AtomicBool::new(false),
            action: move || {
                let journal = weak.upgrade().unwrap();
                journal.append_delete_record(0, false).unwrap();
                journal.append_update_record(10, 1, b"updated", false).unwrap();
                journal.append_commit_record(900, false).unwrap();
            },
        })));
        expected.remove(&0);
        expected.insert(10, b"updated".to_vec());
        expected.insert(5000, b"pending".to_vec());

        journal.compact().unwrap();
        assert!(!journal.contains_record(0));
        assert!(journal.contains_record(5000));
        journal.set_compaction_listener(None);
        journal.stop().unwrap();
    }

    let (journal, loaded) = reopen(&factory);
    assert_records(&loaded, &expected);

    // A second pass over the compacted files stays consistent.
    journal.compact().unwrap();
    journal.stop().unwrap();
    let (_journal, loaded) = reopen(&factory);
    assert_records(&loaded, &expected);
}

fn current_file(journal: &Journal) -> FileId {
    journal.file_stats().into_iter().find(|f| f.is_current).unwrap().id
}

#[test]
fn transactional_delete_committed_during_compaction_stays_deleted() {
    let factory = InMemoryFileFactory::new();
    let mut expected = HashMap::new();
    {
        let (journal, _) = reopen(&factory);
        for id in 1..=3 {
            journal.append_add_record(id, 1, &payload(id, 1000), false).unwrap();
            expected.insert(id, payload(id, 1000));
        }
        // Top up the first file with live records so it is never compacted.
        let first = current_file(&journal);
        let mut filler = 10;
        while current_file(&journal) == first {
            journal.append_add_record(filler, 1, &payload(filler, 100), false).unwrap();
            expected.insert(filler, payload(filler, 100));
            filler += 1;
        }
        journal.append_delete_record(filler - 1, false).unwrap();
        expected.remove(&(filler - 1));

        // The delete of record 1 sits in a file that is about to die.
        journal.append_delete_record_transactional(50, 1, b"").unwrap();
        for id in 500..530 {
            journal.append_add_record(id, 1, &payload(id, 100), false).unwrap();
        }
        for id in 500..530 {
            journal.append_delete_record(id, false).unwrap();
        }
        journal.flush_background();

        let weak = Arc::downgrade(&journal);
        journal.set_compaction_listener(Some(Arc::new(MidCopy {
            fired: AtomicBool::new(false),
            action: move || {
                let journal = weak.upgrade().unwrap();
                journal.append_commit_record(50, false).unwrap();
            },
        })));
        expected.remove(&1);

        let result = journal.compact().unwrap();
        assert!(result.compacted_files > 0);
        journal.set_compaction_listener(None);
        assert!(!journal.contains_record(1));
        assert!(journal.file_stats().iter().any(|f| f.id == first));

        // The copied delete still negates record 1, so its file must stay.
        journal.reclaim().unwrap();
        journal.stop().unwrap();
    }

    let (journal, loaded) = reopen(&factory);
    assert!(!journal.contains_record(1));
    assert_eq!(loaded.stats.discarded_transactions, 0);
    assert_records(&loaded, &expected);
}

#[test]
fn cancelled_compaction_changes_nothing() {
    struct CancelOnStart(Weak<Journal>);
    impl CompactionListener for CancelOnStart {
        fn on_phase(&self, phase: CompactionPhase) {
            if phase == CompactionPhase::Started {
                if let Some(journal) = self.0.upgrade() {
                    journal.cancel_compaction();
                }
            }
        }
    }

    let factory = InMemoryFileFactory::new();
    let expected;
    {
        let (journal, _) = reopen(&factory);
        expected = fill_mostly_dead(&journal);
        journal.set_compaction_listener(Some(Arc::new(CancelOnStart(Arc::downgrade(&journal)))));

        let err = journal.compact().unwrap_err();
        assert!(matches!(err, JournalError::CompactionCancelled));
        assert!(!journal.is_compacting());
        assert_eq!(journal.stats().compactions, 0);
        assert!(factory.list_files(COMPACT_SUFFIX).unwrap().is_empty());
        journal.set_compaction_listener(None);
        journal.stop().unwrap();
    }

    let (_journal, loaded) = reopen(&factory);
    assert_records(&loaded, &expected);
}

#[test]
fn nothing_to_compact() {
    let factory = InMemoryFileFactory::new();
    let (journal, _) = reopen(&factory);
    journal.append_add_record(1, 0, b"x", false).unwrap();
    let result = journal.compact().unwrap();
    assert_eq!(result, CompactionResult::default());
}

#[test]
fn dead_current_file_waits_until_sealed() {
    let factory = InMemoryFileFactory::new();
    let (journal, _) = reopen(&factory);
    for id in 0..5 {
        journal.append_add_record(id, 0, &payload(id, 100), false).unwrap();
    }
    for id in 0..5 {
        journal.append_delete_record(id, false).unwrap();
    }
    let dead = current_file(&journal);
    assert_eq!(journal.compact().unwrap(), CompactionResult::default());
    assert_eq!(current_file(&journal), dead);

    journal.append_add_record(100, 0, &payload(100, 3500), false).unwrap();
    assert_ne!(current_file(&journal), dead);
    let result = journal.compact().unwrap();
    assert_eq!(result.compacted_files, 1);
    assert!(journal.file_stats().iter().all(|f| f.id != dead));
    assert!(journal.contains_record(100));
}

#[derive(Debug, Clone)]
enum Op {
    Put(u64, Vec<u8>),
    Delete(u64),
    Reclaim,
    Compact,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u64..24, proptest::collection::vec(any::<u8>(), 0..200)).prop_map(|(id, data)| Op::Put(id, data)),
        3 => (0u64..24).prop_map(Op::Delete),
        1 => Just(Op::Reclaim),
        1 => Just(Op::Compact),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reload_matches_model(ops in proptest::collection::vec(op(), 1..150)) {
        let factory = InMemoryFileFactory::new();
        let mut model: HashMap<u64, Vec<u8>> = HashMap::new();
        {
            let (journal, _) = reopen(&factory);
            for op in ops {
                match op {
                    Op::Put(id, data) => {
                        if model.contains_key(&id) {
                            journal.append_update_record(id, 0, &data, false).unwrap();
                        } else {
                            journal.append_add_record(id, 0, &data, false).unwrap();
                        }
                        model.insert(id, data);
                    }
                    Op::Delete(id) => {
                        if model.remove(&id).is_some() {
                            journal.append_delete_record(id, false).unwrap();
                        }
                    }
                    Op::Reclaim => {
                        journal.reclaim().unwrap();
                    }
                    Op::Compact => {
                        journal.compact().unwrap();
                    }
                }
            }
            prop_assert_eq!(journal.record_count(), model.len());
            journal.stop().unwrap();
        }

        let (journal, loaded) = reopen(&factory);
        prop_assert_eq!(loaded.records.len(), model.len());
        for record in &loaded.records {
            prop_assert_eq!(Some(&record.data), model.get(&record.id));
        }
        let live: i64 = journal.file_stats().iter().map(|f| f.live_bytes).sum();
        let want: i64 = model.values().map(|d| (30 + d.len()) as i64).sum();
        prop_assert_eq!(live, want);
    }
}
