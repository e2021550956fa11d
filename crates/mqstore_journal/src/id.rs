//! Record and transaction ID generation.

use crate::error::JournalResult;
use crate::journal::Journal;
use crate::types::RecordInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// User record type of the high-water records written by
/// [`BatchingIdGenerator`]. Callers must not use it for their own records.
pub const ID_COUNTER_RECORD_TYPE: u8 = 0xFF;

/// Monotonic in-memory ID source.
///
/// # Example
///
/// ```rust
/// use mqstore_journal::IdGenerator;
///
/// let ids = IdGenerator::new(10);
/// assert_eq!(ids.generate(), 10);
/// assert_eq!(ids.generate(), 11);
/// assert_eq!(ids.current(), 12);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Creates a generator whose first ID is `first`.
    #[must_use]
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns a fresh ID.
    pub fn generate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns the ID the next call to [`generate`](Self::generate) returns.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Moves the generator forward so it never returns an ID below `floor`.
    pub fn advance_to(&self, floor: u64) {
        self.next.fetch_max(floor, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct Batch {
    next: u64,
    limit: u64,
    counter_record: Option<u64>,
}

/// ID source that survives restarts.
///
/// IDs are handed out from blocks. Reserving a block appends a counter
/// record to the journal whose payload is the block's upper bound, so after
/// a crash [`recover`](Self::recover) resumes above every ID that may have
/// been issued. The counter record's own ID is the first ID of its block.
#[derive(Debug)]
pub struct BatchingIdGenerator {
    journal: Arc<Journal>,
    block_size: u64,
    batch: Mutex<Batch>,
}

impl BatchingIdGenerator {
    /// Creates a generator for an empty journal, starting at `first`.
    #[must_use]
    pub fn new(journal: Arc<Journal>, block_size: u64, first: u64) -> Self {
        Self {
            journal,
            block_size: block_size.max(2),
            batch: Mutex::new(Batch {
                next: first,
                limit: first,
                counter_record: None,
            }),
        }
    }

    /// Resumes from the counter records among `records`, as returned by
    /// [`Journal::load`].
    ///
    /// Extra counter records left by a crash between reserving a block and
    /// deleting the previous counter are deleted here.
    ///
    /// # Errors
    ///
    /// Returns an error if a stale counter record cannot be deleted.
    pub fn recover(journal: Arc<Journal>, block_size: u64, records: &[RecordInfo]) -> JournalResult<Self> {
        let mut counters: Vec<(u64, u64)> = records
            .iter()
            .filter(|r| r.user_type == ID_COUNTER_RECORD_TYPE)
            .filter_map(|r| {
                let raw: [u8; 8] = r.data.get(..8)?.try_into().ok()?;
                Some((u64::from_le_bytes(raw), r.id))
            })
            .collect();
        counters.sort_unstable();

        let latest = counters.pop();
        for (_, stale) in counters {
            journal.append_delete_record(stale, false)?;
        }

        let high_water = latest.map_or(1, |(limit, _)| limit);
        tracing::debug!(high_water, "recovered id generator");
        Ok(Self {
            journal,
            block_size: block_size.max(2),
            batch: Mutex::new(Batch {
                next: high_water,
                limit: high_water,
                counter_record: latest.map(|(_, id)| id),
            }),
        })
    }

    /// Returns a fresh ID, reserving a new block in the journal when the
    /// current one is used up.
    ///
    /// # Errors
    ///
    /// Returns an error if the block reservation cannot be written.
    pub fn generate(&self) -> JournalResult<u64> {
        let mut batch = self.batch.lock();
        if batch.next >= batch.limit {
            let start = batch.next;
            let limit = start + self.block_size;
            self.journal.append_add_record(
                start,
                ID_COUNTER_RECORD_TYPE,
                &limit.to_le_bytes(),
                true,
            )?;
            if let Some(previous) = batch.counter_record.replace(start) {
                self.journal.append_delete_record(previous, false)?;
            }
            batch.next = start + 1;
            batch.limit = limit;
        }
        let id = batch.next;
        batch.next += 1;
        Ok(id)
    }

    /// Upper bound of the reserved block.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.batch.lock().limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use mqstore_storage::InMemoryFileFactory;

    fn journal(factory: &InMemoryFileFactory) -> Arc<Journal> {
        let config = JournalConfig::new().file_size(4096).min_files(2);
        Journal::open(config, Arc::new(factory.clone())).unwrap()
    }

    #[test]
    fn plain_generator_is_monotonic() {
        let ids = IdGenerator::new(1);
        let a = ids.generate();
        let b = ids.generate();
        assert!(b > a);
        ids.advance_to(100);
        assert_eq!(ids.generate(), 100);
        ids.advance_to(50);
        assert_eq!(ids.generate(), 101);
    }

    #[test]
    fn batching_generator_resumes_above_issued_ids() {
        let factory = InMemoryFileFactory::new();
        let mut issued = Vec::new();
        {
            let journal = journal(&factory);
            journal.load().unwrap();
            let ids = BatchingIdGenerator::new(Arc::clone(&journal), 8, 1);
            for _ in 0..20 {
                issued.push(ids.generate().unwrap());
            }
            journal.stop().unwrap();
        }

        let journal = journal(&factory);
        let loaded = journal.load().unwrap();
        let counters = loaded
            .records
            .iter()
            .filter(|r| r.user_type == ID_COUNTER_RECORD_TYPE)
            .count();
        assert_eq!(counters, 1);

        let ids = BatchingIdGenerator::recover(Arc::clone(&journal), 8, &loaded.records).unwrap();
        let next = ids.generate().unwrap();
        assert!(issued.iter().all(|&id| id < next));

        let mut sorted = issued.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), issued.len());
        journal.stop().unwrap();
    }

    #[test]
    fn stale_counters_are_removed_on_recover() {
        let factory = InMemoryFileFactory::new();
        {
            let journal = journal(&factory);
            journal.load().unwrap();
            // Two counters, as left by a crash before the old one was deleted.
            journal
                .append_add_record(1, ID_COUNTER_RECORD_TYPE, &9u64.to_le_bytes(), true)
                .unwrap();
            journal
                .append_add_record(9, ID_COUNTER_RECORD_TYPE, &17u64.to_le_bytes(), true)
                .unwrap();
            journal.stop().unwrap();
        }

        let journal = journal(&factory);
        let loaded = journal.load().unwrap();
        let ids = BatchingIdGenerator::recover(Arc::clone(&journal), 8, &loaded.records).unwrap();
        assert!(!journal.contains_record(1));
        assert!(journal.contains_record(9));
        assert_eq!(ids.generate().unwrap(), 18);
        journal.stop().unwrap();
    }
}
