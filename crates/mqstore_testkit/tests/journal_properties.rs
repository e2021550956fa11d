//! Journal properties checked against [`JournalModel`] over generated
//! workloads mixing plain records, transactions and reclaiming.

use mqstore_testkit::prelude::*;
use proptest::prelude::*;

fn live_bytes(journal: &mqstore_journal::Journal) -> i64 {
    journal.file_stats().iter().map(|f| f.live_bytes).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reload_returns_exactly_the_live_records(ops in journal_ops_strategy(40, 1..120)) {
        let fixture = JournalFixture::new();
        let mut model = JournalModel::new();
        {
            let (journal, _) = fixture.open();
            for op in &ops {
                model.apply(&journal, op).unwrap();
            }
            prop_assert_eq!(journal.record_count(), model.len());
            prop_assert!(journal.pending_transactions().is_empty());
            journal.stop().unwrap();
        }

        let (_journal, loaded) = fixture.open();
        prop_assert_eq!(loaded_records(&loaded), model.expected());
        prop_assert!(loaded.prepared.is_empty());
    }

    #[test]
    fn live_bytes_track_the_records_holding_live_data(ops in journal_ops_strategy(40, 1..120)) {
        let fixture = JournalFixture::new();
        let mut model = JournalModel::new();
        let (journal, _) = fixture.open();
        for op in &ops {
            model.apply(&journal, op).unwrap();
        }
        prop_assert_eq!(live_bytes(&journal), model.live_bytes());
        prop_assert!(journal.file_stats().iter().all(|f| f.live_bytes >= 0));
        journal.stop().unwrap();
        drop(journal);

        let (journal, _) = fixture.open();
        prop_assert_eq!(live_bytes(&journal), model.live_bytes());
    }

    #[test]
    fn compaction_preserves_live_records(ops in journal_ops_strategy(30, 20..150)) {
        let fixture = JournalFixture::new();
        let mut model = JournalModel::new();
        {
            let (journal, _) = fixture.open();
            for op in &ops {
                model.apply(&journal, op).unwrap();
            }
            journal.flush_background();
            journal.compact().unwrap();
            journal.reclaim().unwrap();
            prop_assert_eq!(journal.record_count(), model.len());

            // Copied records shrink to plain adds; the others keep their size.
            let live = live_bytes(&journal);
            prop_assert!(live <= model.live_bytes());
            prop_assert!(live >= model.compacted_live_bytes());
            journal.stop().unwrap();
        }

        let (journal, loaded) = fixture.open();
        prop_assert_eq!(loaded_records(&loaded), model.expected());
        prop_assert!(!loaded.stats.compaction_recovered);
        prop_assert!(live_bytes(&journal) <= model.live_bytes());
    }

    #[test]
    fn files_of_deleted_records_hold_no_live_bytes(ops in journal_ops_strategy(40, 1..100)) {
        let fixture = JournalFixture::new();
        let mut model = JournalModel::new();
        let (journal, _) = fixture.open();
        for op in &ops {
            model.apply(&journal, op).unwrap();
        }
        let ids: Vec<u64> = model.records().keys().copied().collect();
        for id in ids {
            model.apply(&journal, &JournalOp::Delete { id }).unwrap();
        }
        prop_assert!(model.is_empty());
        prop_assert!(journal.file_stats().iter().all(|f| f.live_bytes == 0));

        journal.reclaim().unwrap();
        journal.stop().unwrap();
        drop(journal);
        let (_journal, loaded) = fixture.open();
        prop_assert!(loaded.records.is_empty());
    }
}
