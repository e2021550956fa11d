//! Transactional appends that fail on a crashed volume and are retried once
//! the volume comes back.

use mqstore_testkit::prelude::*;

#[test]
fn failed_append_is_retried_and_committed() {
    let fixture = JournalFixture::new();
    {
        let (journal, _, crashing) = fixture.open_crashing();
        journal.append_add_record_transactional(7, 1, 0, b"first").unwrap();

        crashing.crash();
        assert!(journal.append_add_record_transactional(7, 2, 0, b"second").is_err());
        assert!(crashing.refused_operations() > 0);

        crashing.reset();
        journal.append_add_record_transactional(7, 2, 0, b"second").unwrap();
        journal.append_commit_record(7, true).unwrap();
        assert!(journal.contains_record(1));
        assert!(journal.contains_record(2));
        journal.stop().unwrap();
    }

    let (_journal, loaded) = fixture.open();
    assert_eq!(loaded.stats.discarded_transactions, 0);
    assert_eq!(
        loaded_records(&loaded),
        vec![(1, 0, b"first".to_vec()), (2, 0, b"second".to_vec())]
    );
}

#[test]
fn failed_prepare_leaves_the_transaction_prepared_on_retry() {
    let fixture = JournalFixture::new();
    {
        let (journal, _, crashing) = fixture.open_crashing();
        journal.append_add_record_transactional(8, 3, 1, b"staged").unwrap();

        crashing.crash();
        assert!(journal.append_prepare_record(8, b"xid-8", true).is_err());
        crashing.reset();
        journal.append_prepare_record(8, b"xid-8", true).unwrap();
        journal.stop().unwrap();
    }

    let (_journal, loaded) = fixture.open();
    assert_eq!(loaded.stats.discarded_transactions, 0);
    assert_eq!(loaded.prepared.len(), 1);
    assert_eq!(loaded.prepared[0].tx_id, 8);
    assert_eq!(loaded.prepared[0].extra_data, b"xid-8".to_vec());
    assert_eq!(loaded.prepared[0].records.len(), 1);
}
