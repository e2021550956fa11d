//! Compaction interrupted by power loss at every interesting point.
//!
//! Each test crashes the volume while a compaction runs, reopens the journal
//! over the bytes that made it to "disk" and checks that no live record and
//! no prepared transaction was lost or resurrected.

use mqstore_journal::{CompactionListener, CompactionPhase, Journal, COMPACT_SUFFIX};
use mqstore_storage::SequentialFileFactory;
use mqstore_testkit::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PREPARED_TX: u64 = 900;
const PREPARED_RECORD: u64 = 5000;

/// Crashes the volume the first time `at` matches a phase.
struct CrashAt {
    at: fn(CompactionPhase) -> bool,
    crashing: CrashingFileFactory,
    fired: AtomicBool,
}

impl CompactionListener for CrashAt {
    fn on_phase(&self, phase: CompactionPhase) {
        if (self.at)(phase) && !self.fired.swap(true, Ordering::SeqCst) {
            self.crashing.crash();
        }
    }
}

/// A prepared transaction in the oldest file, then 200 records of which
/// every tenth survives. Returns the live payloads.
fn fill_mostly_dead(journal: &Journal) -> BTreeMap<u64, Vec<u8>> {
    journal
        .append_add_record_transactional(PREPARED_TX, PREPARED_RECORD, 2, b"prepared")
        .unwrap();
    journal.append_prepare_record(PREPARED_TX, b"xid-900", true).unwrap();

    let mut live = BTreeMap::new();
    for id in 0..200 {
        let data = payload(id, 100);
        journal.append_add_record(id, 1, &data, false).unwrap();
        live.insert(id, data);
    }
    for id in (0..200).filter(|id| id % 10 != 0) {
        journal.append_delete_record(id, false).unwrap();
        live.remove(&id);
    }
    journal.flush_background();
    live
}

fn assert_intact(fixture: &JournalFixture, expected: &BTreeMap<u64, Vec<u8>>) -> Arc<Journal> {
    let (journal, loaded) = fixture.open();
    let records: BTreeMap<u64, Vec<u8>> = loaded.records.iter().map(|r| (r.id, r.data.clone())).collect();
    assert_eq!(&records, expected);

    assert_eq!(loaded.prepared.len(), 1);
    let prepared = &loaded.prepared[0];
    assert_eq!(prepared.tx_id, PREPARED_TX);
    assert_eq!(prepared.extra_data, b"xid-900");
    assert_eq!(prepared.records.len(), 1);
    assert_eq!(prepared.records[0].id, PREPARED_RECORD);

    assert!(fixture.volume.list_files(COMPACT_SUFFIX).unwrap().is_empty());
    assert!(fixture.volume.file_data(&fixture.config().control_file_name()).is_none());
    journal
}

/// Runs a compaction that crashes at `at`, then restarts.
fn crash_during_compaction(at: fn(CompactionPhase) -> bool) -> (JournalFixture, BTreeMap<u64, Vec<u8>>, usize) {
    let fixture = JournalFixture::new();
    let (journal, _, crashing) = fixture.open_crashing();
    let expected = fill_mostly_dead(&journal);
    let files_before = fixture.data_files().len();

    journal.set_compaction_listener(Some(Arc::new(CrashAt {
        at,
        crashing: crashing.clone(),
        fired: AtomicBool::new(false),
    })));
    assert!(journal.compact().is_err());
    assert!(crashing.has_crashed());
    drop(journal);

    (fixture, expected, files_before)
}

#[test]
fn crash_while_copying_rolls_back() {
    let (fixture, expected, _) = crash_during_compaction(|p| matches!(p, CompactionPhase::FileCompacted(_)));
    let (journal, loaded) = fixture.open();
    assert!(!loaded.stats.compaction_recovered);
    drop((journal, loaded));

    let journal = assert_intact(&fixture, &expected);
    let result = journal.compact().unwrap();
    assert!(result.compacted_files > 0);
    journal.stop().unwrap();
    assert_intact(&fixture, &expected);
}

#[test]
fn crash_after_control_file_rolls_forward() {
    let (fixture, expected, files_before) =
        crash_during_compaction(|p| p == CompactionPhase::ControlFileWritten);
    assert!(fixture.volume.file_data(&fixture.config().control_file_name()).is_some());

    let (journal, loaded) = fixture.open();
    assert!(loaded.stats.compaction_recovered);
    journal.stop().unwrap();
    assert!(fixture.data_files().len() < files_before);
    assert_intact(&fixture, &expected);
}

#[test]
fn crash_after_swap_rolls_forward() {
    let (fixture, expected, files_before) = crash_during_compaction(|p| p == CompactionPhase::Swapped);
    assert!(!fixture.volume.list_files(COMPACT_SUFFIX).unwrap().is_empty());

    let (journal, loaded) = fixture.open();
    assert!(loaded.stats.compaction_recovered);
    journal.stop().unwrap();
    assert!(fixture.data_files().len() < files_before);
    assert_intact(&fixture, &expected);
}

#[test]
fn crash_after_rename_rolls_forward() {
    let (fixture, expected, _) = crash_during_compaction(|p| p == CompactionPhase::FilesRenamed);
    assert!(fixture.volume.list_files(COMPACT_SUFFIX).unwrap().is_empty());

    let (journal, loaded) = fixture.open();
    assert!(loaded.stats.compaction_recovered);
    journal.append_add_record(10_000, 0, b"after recovery", true).unwrap();
    journal.stop().unwrap();

    let mut expected = expected;
    expected.insert(10_000, b"after recovery".to_vec());
    assert_intact(&fixture, &expected);
}

#[test]
fn torn_writes_anywhere_in_compaction() {
    for writes in [0, 1, 2, 3, 5, 8, 13, 21, 34] {
        let fixture = JournalFixture::new();
        let (journal, _, crashing) = fixture.open_crashing();
        let expected = fill_mostly_dead(&journal);

        crashing.tear_on_crash(true);
        crashing.crash_after_writes(writes);
        let outcome = journal.compact();
        if crashing.has_crashed() {
            assert!(outcome.is_err(), "crash after {writes} writes went unnoticed");
        }
        drop(journal);

        let journal = assert_intact(&fixture, &expected);
        journal.stop().unwrap();
    }
}

#[test]
fn crash_after_recovery_is_recoverable() {
    let (fixture, expected, _) = crash_during_compaction(|p| p == CompactionPhase::ControlFileWritten);

    // Crash the restart itself as soon as recovery starts writing.
    let crashing = CrashingFileFactory::new(Arc::new(fixture.volume.clone()));
    crashing.crash_after_writes(1);
    if let Ok(journal) = Journal::open(fixture.config().clone(), Arc::new(crashing.clone())) {
        let _ = journal.load();
    }

    let journal = assert_intact(&fixture, &expected);
    journal.stop().unwrap();
}
