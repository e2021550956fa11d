//! Journal and broker fixtures.
//!
//! Every fixture keeps its data in [`InMemoryFileFactory`] volumes that
//! outlive the journal, so a test can stop (or crash) a journal and open a
//! new one over the same bytes.

use crate::crash::CrashingFileFactory;
use mqstore_journal::{BatchingIdGenerator, Journal, JournalConfig, LoadedJournal};
use mqstore_paging::{
    DepageListener, MemoryQueue, PagedMessage, PagingConfig, PagingManager, PagingStorage, JournalPagingStorage,
    RecoveredPaging,
};
use mqstore_storage::{InMemoryFileFactory, SequentialFileFactory};
use std::sync::Arc;

/// Journal file size used by [`small_journal_config`].
pub const SMALL_FILE_SIZE: u64 = 4096;

/// ID block reserved by the broker fixture's generator.
pub const ID_BLOCK: u64 = 100;

/// A journal config with small files and no automatic reclaiming, so tests
/// fill several files quickly and control when files are recycled.
#[must_use]
pub fn small_journal_config() -> JournalConfig {
    JournalConfig::new()
        .file_size(SMALL_FILE_SIZE)
        .min_files(2)
        .auto_reclaim(false)
}

/// Deterministic payload of `len` bytes derived from `id`.
#[must_use]
pub fn payload(id: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (id as usize).wrapping_add(i) as u8).collect()
}

/// A journal volume that survives restarts.
#[derive(Debug, Clone)]
pub struct JournalFixture {
    /// The bytes on "disk".
    pub volume: InMemoryFileFactory,
    config: JournalConfig,
}

impl Default for JournalFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalFixture {
    /// Creates an empty volume with [`small_journal_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(small_journal_config())
    }

    /// Creates an empty volume opened with `config`.
    #[must_use]
    pub fn with_config(config: JournalConfig) -> Self {
        Self {
            volume: InMemoryFileFactory::new(),
            config,
        }
    }

    /// The config every open uses.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Opens and loads a journal over the volume.
    #[must_use]
    pub fn open(&self) -> (Arc<Journal>, LoadedJournal) {
        open_over(self.config.clone(), Arc::new(self.volume.clone()))
    }

    /// Opens and loads a journal whose files can be crashed through the
    /// returned factory. Reopen with [`open`](Self::open) to restart.
    #[must_use]
    pub fn open_crashing(&self) -> (Arc<Journal>, LoadedJournal, CrashingFileFactory) {
        let crashing = CrashingFileFactory::new(Arc::new(self.volume.clone()));
        let (journal, loaded) = open_over(self.config.clone(), Arc::new(crashing.clone()));
        (journal, loaded, crashing)
    }

    /// Names of the data files currently on the volume, ordered by sequence.
    #[must_use]
    pub fn data_files(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = self
            .volume
            .list_files(&self.config.file_extension)
            .expect("list journal files")
            .into_iter()
            .filter_map(|name| self.config.parse_data_file_name(&name).map(|seq| (seq, name)))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }
}

fn open_over(config: JournalConfig, factory: Arc<dyn SequentialFileFactory>) -> (Arc<Journal>, LoadedJournal) {
    let journal = Journal::open(config, factory).expect("Failed to open journal");
    let loaded = journal.load().expect("Failed to load journal");
    (journal, loaded)
}

/// A broker's persistence stack: journal, ID generator, paging manager and
/// one queue receiving every depaged message.
///
/// [`start`](Self::start) plays a broker boot: it loads the journal,
/// recovers the paging records, re-enqueues durable depaged messages and
/// starts paging.
pub struct BrokerFixture {
    /// The journal.
    pub journal: Arc<Journal>,
    /// Shared ID generator for messages and paging records.
    pub ids: Arc<BatchingIdGenerator>,
    /// Paging manager.
    pub manager: PagingManager,
    /// Queue fed by depaging and by recovery.
    pub queue: Arc<MemoryQueue>,
    /// Paging state found in the journal at boot.
    pub recovered: RecoveredPaging,
    /// The journal as loaded at boot.
    pub loaded: LoadedJournal,
}

impl BrokerFixture {
    /// Boots over `journal_volume` and `paging_volume`.
    #[must_use]
    pub fn start(
        journal_volume: Arc<dyn SequentialFileFactory>,
        paging_volume: Arc<dyn SequentialFileFactory>,
        config: PagingConfig,
    ) -> Self {
        let journal_config = JournalConfig::new().file_size(64 * 1024).min_files(2).auto_reclaim(false);
        let (journal, loaded) = open_over(journal_config, journal_volume);
        let ids = Arc::new(
            BatchingIdGenerator::recover(Arc::clone(&journal), ID_BLOCK, &loaded.records)
                .expect("Failed to recover ID generator"),
        );
        let storage: Arc<dyn PagingStorage> =
            Arc::new(JournalPagingStorage::new(Arc::clone(&journal), Arc::clone(&ids)));
        let recovered = RecoveredPaging::from_records(&loaded.records).expect("Failed to recover paging records");

        let queue = Arc::new(MemoryQueue::with_storage(Arc::clone(&storage)));
        for message in &recovered.messages {
            queue.enqueue(message.clone());
        }
        let manager = PagingManager::new(config, paging_volume, storage).expect("Failed to create paging manager");
        manager.set_depage_listener(Arc::clone(&queue) as Arc<dyn DepageListener>);
        manager.start(&recovered).expect("Failed to start paging");
        Self {
            journal,
            ids,
            manager,
            queue,
            recovered,
            loaded,
        }
    }

    /// Boots over two in-memory volumes.
    #[must_use]
    pub fn start_in_memory(
        journal_volume: &InMemoryFileFactory,
        paging_volume: &InMemoryFileFactory,
        config: PagingConfig,
    ) -> Self {
        Self::start(
            Arc::new(journal_volume.clone()),
            Arc::new(paging_volume.clone()),
            config,
        )
    }

    /// A new message with a fresh ID and a `body_len` body.
    #[must_use]
    pub fn message(&self, body_len: usize, durable: bool) -> PagedMessage {
        let id = self.ids.generate().expect("Failed to generate message ID");
        PagedMessage::new(id, durable, payload(id, body_len))
    }

    /// Receives everything ready on the queue and returns the message IDs in
    /// delivery order. Deliveries stay unacknowledged.
    #[must_use]
    pub fn drain(&self) -> Vec<u64> {
        std::iter::from_fn(|| self.queue.receive())
            .map(|delivery| delivery.message.message_id)
            .collect()
    }

    /// Stops paging and the journal cleanly.
    pub fn stop(self) {
        self.manager.stop().expect("Failed to stop paging");
        self.journal.stop().expect("Failed to stop journal");
    }
}

impl std::fmt::Debug for BrokerFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerFixture")
            .field("journal", &self.journal)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
