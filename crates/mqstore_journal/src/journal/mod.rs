//! The journal: an append-only log of records and transaction markers.
//!
//! # Locking
//!
//! Locks are always taken in this order:
//!
//! 1. `compacting_lock` (read for mutations, write for the compaction
//!    snapshot and swap)
//! 2. a transaction's mutex
//! 3. `append_lock`, which makes the caller the single writer
//! 4. `files`
//! 5. `tracker`
//!
//! Every change to the record map and to file counters happens under the
//! append lock or the compaction write lock.

mod compact;
mod load;

use crate::compactor::{CompactionListener, CompactionPhase, CompactionTracker};
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::executor::JournalExecutor;
use crate::file::{write_header, JournalFile};
use crate::manifest::JournalManifest;
use crate::reclaimer;
use crate::record::JournalRecord;
use crate::stats::{FileStats, JournalCounters, JournalStats};
use crate::transaction::{JournalTransaction, RecordLocation, TxOp};
use crate::types::FileId;
use dashmap::DashMap;
use mqstore_storage::{SequentialFile, SequentialFileFactory};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalState {
    Opened,
    Loaded,
    Stopped,
}

/// The ordered file set.
#[derive(Debug, Default)]
struct FileSet {
    /// Sealed files, ascending by ID.
    data: Vec<Arc<JournalFile>>,
    current: Option<Arc<JournalFile>>,
    /// Closed, zero-filled files ready for activation.
    free: Vec<Arc<dyn SequentialFile>>,
    /// Sequence number for the next file name.
    next_name: u64,
}

impl FileSet {
    /// Data files followed by the current file.
    fn ordered(&self) -> Vec<Arc<JournalFile>> {
        self.data.iter().chain(self.current.iter()).cloned().collect()
    }

    fn ids(&self) -> Vec<FileId> {
        self.data
            .iter()
            .chain(self.current.iter())
            .map(|f| f.id())
            .collect()
    }

    fn total(&self) -> usize {
        self.data.len() + usize::from(self.current.is_some()) + self.free.len()
    }

    fn allocate_name(&mut self, config: &JournalConfig) -> String {
        let seq = self.next_name;
        self.next_name += 1;
        config.data_file_name(seq)
    }
}

/// An append-only journal over a [`SequentialFileFactory`].
///
/// Records are identified by caller-assigned IDs. Every mutation is appended
/// to the current file; when it fills up the next file is taken from a pool
/// of pre-allocated files. Files whose entries are all dead are reclaimed,
/// and files that are mostly dead are compacted while writers continue.
///
/// # Example
///
/// ```rust
/// use mqstore_journal::{Journal, JournalConfig};
/// use mqstore_storage::InMemoryFileFactory;
/// use std::sync::Arc;
///
/// let factory = Arc::new(InMemoryFileFactory::new());
/// let config = JournalConfig::new().file_size(64 * 1024);
///
/// let journal = Journal::open(config.clone(), factory.clone()).unwrap();
/// journal.load().unwrap();
/// journal.append_add_record(1, 7, b"hello", true).unwrap();
/// journal.append_add_record_transactional(100, 2, 7, b"world").unwrap();
/// journal.append_commit_record(100, true).unwrap();
/// journal.stop().unwrap();
///
/// let journal = Journal::open(config, factory).unwrap();
/// let loaded = journal.load().unwrap();
/// assert_eq!(loaded.records.len(), 2);
/// ```
pub struct Journal {
    config: JournalConfig,
    factory: Arc<dyn SequentialFileFactory>,
    state: Mutex<JournalState>,
    compacting_lock: RwLock<()>,
    append_lock: Mutex<()>,
    files: Mutex<FileSet>,
    next_file_id: AtomicU64,
    records: DashMap<u64, RecordLocation>,
    transactions: DashMap<u64, Arc<Mutex<JournalTransaction>>>,
    tracker: Mutex<Option<CompactionTracker>>,
    compacting: AtomicBool,
    cancel_compaction: AtomicBool,
    listener: RwLock<Option<Arc<dyn CompactionListener>>>,
    executor: JournalExecutor,
    counters: JournalCounters,
    this: Weak<Journal>,
}

impl Journal {
    /// Creates a journal over `factory`. Nothing is read until
    /// [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if `config` is invalid.
    pub fn open(config: JournalConfig, factory: Arc<dyn SequentialFileFactory>) -> JournalResult<Arc<Self>> {
        config.validate()?;
        let executor = JournalExecutor::start(&format!("{}-executor", config.file_prefix));
        Ok(Arc::new_cyclic(|this| Self {
            config,
            factory,
            state: Mutex::new(JournalState::Opened),
            compacting_lock: RwLock::new(()),
            append_lock: Mutex::new(()),
            files: Mutex::new(FileSet::default()),
            next_file_id: AtomicU64::new(1),
            records: DashMap::new(),
            transactions: DashMap::new(),
            tracker: Mutex::new(None),
            compacting: AtomicBool::new(false),
            cancel_compaction: AtomicBool::new(false),
            listener: RwLock::new(None),
            executor,
            counters: JournalCounters::default(),
            this: this.clone(),
        }))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns true between a successful [`load`](Self::load) and
    /// [`stop`](Self::stop).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        *self.state.lock() == JournalState::Loaded
    }

    fn ensure_loaded(&self) -> JournalResult<()> {
        match *self.state.lock() {
            JournalState::Loaded => Ok(()),
            JournalState::Opened => Err(JournalError::invalid_state("journal is not loaded")),
            JournalState::Stopped => Err(JournalError::invalid_state("journal is stopped")),
        }
    }

    /// Stops background work, syncs the current file and closes all files.
    ///
    /// Stopping twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the current file cannot be synced or closed.
    pub fn stop(&self) -> JournalResult<()> {
        {
            let mut state = self.state.lock();
            if *state == JournalState::Stopped {
                return Ok(());
            }
            *state = JournalState::Stopped;
        }
        self.cancel_compaction.store(true, Ordering::SeqCst);
        self.executor.shutdown();

        let _compacting = self.compacting_lock.write();
        let files = self.files.lock();
        if let Some(current) = &files.current {
            if current.file().is_open() {
                current.file().sync()?;
            }
        }
        for file in files.data.iter().chain(files.current.iter()) {
            file.file().close()?;
        }
        tracing::debug!(prefix = %self.config.file_prefix, "journal stopped");
        Ok(())
    }

    // === Non-transactional operations ===

    /// Appends a new record.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::DuplicateRecord`] if `id` is live, or an I/O
    /// error.
    pub fn append_add_record(&self, id: u64, user_type: u8, payload: &[u8], sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let _append = self.append_lock.lock();
        if self.records.contains_key(&id) {
            return Err(JournalError::DuplicateRecord { id });
        }
        let record = JournalRecord::Add {
            id,
            user_type,
            body: payload.to_vec(),
        };
        let location = self.write_record(record, self.sync_plain(sync), None)?;
        self.apply_put(id, location);
        Ok(())
    }

    /// Replaces the payload of a live record.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if `id` is not live, or an
    /// I/O error.
    pub fn append_update_record(&self, id: u64, user_type: u8, payload: &[u8], sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let _append = self.append_lock.lock();
        if !self.records.contains_key(&id) {
            return Err(JournalError::RecordNotFound { id });
        }
        let record = JournalRecord::Update {
            id,
            user_type,
            body: payload.to_vec(),
        };
        let location = self.write_record(record, self.sync_plain(sync), None)?;
        self.apply_put(id, location);
        Ok(())
    }

    /// Deletes a live record.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if `id` is not live, or an
    /// I/O error.
    pub fn append_delete_record(&self, id: u64, sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let _append = self.append_lock.lock();
        if !self.records.contains_key(&id) {
            return Err(JournalError::RecordNotFound { id });
        }
        let location = self.write_record(JournalRecord::Delete { id }, self.sync_plain(sync), None)?;
        self.apply_delete(id, &location);
        Ok(())
    }

    // === Transactional operations ===

    /// Adds a record inside transaction `tx_id`, starting the transaction if
    /// needed. The record becomes live on commit.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the append fails.
    pub fn append_add_record_transactional(
        &self,
        tx_id: u64,
        id: u64,
        user_type: u8,
        payload: &[u8],
    ) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let tx = self.transaction(tx_id);
        let mut tx = tx.lock();
        let _append = self.append_lock.lock();
        let record = JournalRecord::AddTx {
            tx_id,
            id,
            user_type,
            body: payload.to_vec(),
        };
        let location = self.write_record(record, false, Some(&mut *tx))?;
        tx.push(TxOp::Put { id, location });
        Ok(())
    }

    /// Updates a record inside transaction `tx_id`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if `id` is neither live nor
    /// added earlier in the same transaction, or an I/O error.
    pub fn append_update_record_transactional(
        &self,
        tx_id: u64,
        id: u64,
        user_type: u8,
        payload: &[u8],
    ) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        self.require_known(tx_id, id)?;
        let tx = self.transaction(tx_id);
        let mut tx = tx.lock();
        let _append = self.append_lock.lock();
        let record = JournalRecord::UpdateTx {
            tx_id,
            id,
            user_type,
            body: payload.to_vec(),
        };
        let location = self.write_record(record, false, Some(&mut *tx))?;
        tx.push(TxOp::Put { id, location });
        Ok(())
    }

    /// Deletes a record inside transaction `tx_id`. `payload` is stored with
    /// the delete and returned for prepared transactions on load.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if `id` is neither live nor
    /// added earlier in the same transaction, or an I/O error.
    pub fn append_delete_record_transactional(&self, tx_id: u64, id: u64, payload: &[u8]) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        self.require_known(tx_id, id)?;
        let tx = self.transaction(tx_id);
        let mut tx = tx.lock();
        let _append = self.append_lock.lock();
        let record = JournalRecord::DeleteTx {
            tx_id,
            id,
            body: payload.to_vec(),
        };
        let location = self.write_record(record, false, Some(&mut *tx))?;
        tx.push(TxOp::Delete { id, location });
        Ok(())
    }

    /// Writes the first phase of a two-phase commit. A prepared transaction
    /// survives restarts and is returned by [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the append fails.
    pub fn append_prepare_record(&self, tx_id: u64, extra_data: &[u8], sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let tx = self.transaction(tx_id);
        let mut tx = tx.lock();
        let _append = self.append_lock.lock();
        let record = JournalRecord::Prepare {
            tx_id,
            record_count: 0,
            extra: extra_data.to_vec(),
        };
        self.write_record(record, self.sync_tx(sync), Some(&mut *tx))?;
        tx.set_prepared();
        Ok(())
    }

    /// Commits transaction `tx_id`, making its operations visible.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::TransactionNotFound`] if the transaction is
    /// unknown or already completed, or an I/O error. On I/O error the
    /// transaction stays open.
    pub fn append_commit_record(&self, tx_id: u64, sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let Some((_, handle)) = self.transactions.remove(&tx_id) else {
            return Err(JournalError::TransactionNotFound { tx_id });
        };
        let mut tx = handle.lock();
        let append = self.append_lock.lock();
        let record = JournalRecord::Commit {
            tx_id,
            record_count: 0,
        };
        let location = match self.write_record(record, self.sync_tx(sync), Some(&mut *tx)) {
            Ok(location) => location,
            Err(e) => {
                drop(append);
                drop(tx);
                self.transactions.insert(tx_id, handle);
                return Err(e);
            }
        };
        for op in tx.ops() {
            match op {
                TxOp::Put { id, location } => self.apply_put(*id, location.clone()),
                TxOp::Delete { id, location } => self.apply_delete(*id, location),
            }
        }
        self.complete(&tx, &location.file);
        self.counters.record_commit();
        Ok(())
    }

    /// Rolls back transaction `tx_id`, discarding its operations.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::TransactionNotFound`] if the transaction is
    /// unknown or already completed, or an I/O error. On I/O error the
    /// transaction stays open.
    pub fn append_rollback_record(&self, tx_id: u64, sync: bool) -> JournalResult<()> {
        self.ensure_loaded()?;
        let _compacting = self.compacting_lock.read();
        let Some((_, handle)) = self.transactions.remove(&tx_id) else {
            return Err(JournalError::TransactionNotFound { tx_id });
        };
        let mut tx = handle.lock();
        let append = self.append_lock.lock();
        let location = match self.write_record(JournalRecord::Rollback { tx_id }, self.sync_tx(sync), Some(&mut *tx)) {
            Ok(location) => location,
            Err(e) => {
                drop(append);
                drop(tx);
                self.transactions.insert(tx_id, handle);
                return Err(e);
            }
        };
        self.complete(&tx, &location.file);
        self.counters.record_rollback();
        Ok(())
    }

    fn transaction(&self, tx_id: u64) -> Arc<Mutex<JournalTransaction>> {
        Arc::clone(
            self.transactions
                .entry(tx_id)
                .or_insert_with(|| Arc::new(Mutex::new(JournalTransaction::new(tx_id))))
                .value(),
        )
    }

    fn require_known(&self, tx_id: u64, id: u64) -> JournalResult<()> {
        if self.records.contains_key(&id) {
            return Ok(());
        }
        let open = self.transactions.get(&tx_id).map(|t| Arc::clone(t.value()));
        if open.is_some_and(|tx| tx.lock().puts(id)) {
            return Ok(());
        }
        Err(JournalError::RecordNotFound { id })
    }

    fn sync_plain(&self, sync: bool) -> bool {
        sync || self.config.sync_non_transactional
    }

    fn sync_tx(&self, sync: bool) -> bool {
        sync || self.config.sync_transactional
    }

    // === Appending ===

    /// Writes `record` to the current file, rolling over first if it does not
    /// fit. The caller holds the append lock.
    fn write_record(
        &self,
        mut record: JournalRecord,
        sync: bool,
        tx: Option<&mut JournalTransaction>,
    ) -> JournalResult<RecordLocation> {
        let size = record.encoded_size();
        let max = self.config.max_record_size();
        if size > max {
            return Err(JournalError::RecordTooLarge { size, max });
        }
        let file = self.current_with_room(size as u64)?;

        if let Some(tx) = tx.as_deref() {
            if let JournalRecord::Prepare { record_count, .. } | JournalRecord::Commit { record_count, .. } =
                &mut record
            {
                *record_count = tx.count_in(file.id());
            }
        }

        let offset = file.file().position();
        if let Err(e) = file.file().write(&record.encode(file.id()), sync) {
            // Later records overwrite whatever part of this one reached the file.
            let _ = file.file().set_position(offset);
            return Err(e.into());
        }
        // The transaction only learns about records that were written.
        if let Some(tx) = tx {
            match &record {
                JournalRecord::Prepare { .. } => tx.touch_file(&file),
                JournalRecord::AddTx { .. } | JournalRecord::UpdateTx { .. } | JournalRecord::DeleteTx { .. } => {
                    tx.count_record(file.id());
                    tx.touch_file(&file);
                }
                _ => {}
            }
        }
        self.counters.record_append(size);
        Ok(RecordLocation {
            file,
            offset,
            size: size as u32,
        })
    }

    fn current_with_room(&self, size: u64) -> JournalResult<Arc<JournalFile>> {
        let mut files = self.files.lock();
        if let Some(current) = &files.current {
            if current.file().position() + size <= self.config.file_size {
                return Ok(Arc::clone(current));
            }
        }
        self.roll_over(&mut files)
    }

    /// Seals the current file and activates the next one.
    fn roll_over(&self, files: &mut FileSet) -> JournalResult<Arc<JournalFile>> {
        if let Some(current) = &files.current {
            current.file().sync()?;
        }
        let file = match files.free.pop() {
            Some(pooled) => {
                pooled.open()?;
                pooled
            }
            None => {
                let name = files.allocate_name(&self.config);
                self.create_file(&name)?
            }
        };
        let id = FileId::new(self.next_file_id.fetch_add(1, Ordering::SeqCst));
        write_header(file.as_ref(), id)?;

        let activated = Arc::new(JournalFile::new(id, file));
        if let Some(sealed) = files.current.replace(Arc::clone(&activated)) {
            files.data.push(sealed);
        }
        self.save_manifest(files)?;
        tracing::debug!(file = %id, name = %activated.name(), data_files = files.data.len(), "rolled over to new journal file");

        self.schedule_maintenance();
        Ok(activated)
    }

    /// Creates, opens and zero-fills a new journal file.
    fn create_file(&self, name: &str) -> JournalResult<Arc<dyn SequentialFile>> {
        let file = self.factory.create_sequential_file(name, self.config.max_io);
        file.open()?;
        file.fill(0, self.config.file_size, 0)?;
        Ok(file)
    }

    fn save_manifest(&self, files: &FileSet) -> JournalResult<()> {
        JournalManifest::new(files.ids()).save(self.factory.as_ref(), &self.manifest_name())
    }

    pub(crate) fn manifest_name(&self) -> String {
        self.config.manifest_name()
    }

    pub(crate) fn control_file_name(&self) -> String {
        self.config.control_file_name()
    }

    // === Accounting ===

    fn apply_put(&self, id: u64, location: RecordLocation) {
        location.file.inc_pos();
        location.file.add_live(location.size);
        if let Some(old) = self.records.insert(id, location.clone()) {
            self.negate(&old, &location);
        }
    }

    fn apply_delete(&self, id: u64, by: &RecordLocation) {
        if let Some((_, old)) = self.records.remove(&id) {
            self.negate(&old, by);
        }
    }

    fn negate(&self, old: &RecordLocation, by: &RecordLocation) {
        old.file.sub_live(old.size);
        by.file.inc_neg(old.file.id());
        if let Some(tracker) = self.tracker.lock().as_mut() {
            tracker.on_negated(old, by);
        }
    }

    /// Negates the participation of a finished transaction.
    fn complete(&self, tx: &JournalTransaction, by: &Arc<JournalFile>) {
        for file in tx.files() {
            by.inc_neg(file.id());
        }
        if let Some(tracker) = self.tracker.lock().as_mut() {
            tracker.on_tx_completed(tx.id(), by);
        }
    }

    // === Reclaiming and background work ===

    /// Removes files whose entries are all dead. Returns how many went.
    ///
    /// Nothing is reclaimed while a compaction runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written.
    pub fn reclaim(&self) -> JournalResult<usize> {
        self.ensure_loaded()?;
        let reclaimed = {
            let _compacting = self.compacting_lock.read();
            if self.compacting.load(Ordering::SeqCst) {
                return Ok(0);
            }
            let _append = self.append_lock.lock();
            let mut files = self.files.lock();
            let dead = reclaimer::scan(&files.ordered());
            if dead.is_empty() {
                return Ok(0);
            }
            let gone: HashSet<FileId> = dead.iter().map(|f| f.id()).collect();
            files.data.retain(|f| !gone.contains(&f.id()));
            for file in files.ordered() {
                file.forget_negations(&|id| gone.contains(&id));
            }
            self.save_manifest(&files)?;
            dead
        };

        for file in &reclaimed {
            tracing::debug!(file = %file.id(), name = %file.name(), "reclaiming journal file");
            self.retire(file);
        }
        self.counters.record_reclaim(reclaimed.len());
        Ok(reclaimed.len())
    }

    /// Returns a file that left the file set to the pool, or deletes it when
    /// the journal already has `min_files` files.
    fn retire(&self, file: &Arc<JournalFile>) {
        let recycle = self.files.lock().total() < self.config.min_files;
        let handle = file.file();
        let outcome = if recycle {
            handle
                .fill(0, self.config.file_size, 0)
                .and_then(|()| handle.close())
                .map(|()| self.files.lock().free.push(Arc::clone(handle)))
        } else {
            handle.delete()
        };
        if let Err(e) = outcome {
            tracing::warn!(file = %file.id(), name = %file.name(), error = %e, "could not retire journal file");
        }
    }

    /// True if the data files are mostly dead and numerous enough to compact.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        let files = self.files.lock();
        let count = files.data.len();
        if count <= self.config.compact_min_files {
            return false;
        }
        let live: i64 = files.data.iter().map(|f| f.live_bytes()).sum();
        let capacity = count as u128 * u128::from(self.config.file_size);
        (live.max(0) as u128) * 100 < capacity * u128::from(self.config.compact_percentage)
    }

    fn schedule_maintenance(&self) {
        let this = self.this.clone();
        self.executor.execute(move || {
            if let Some(journal) = this.upgrade() {
                journal.run_maintenance();
            }
        });
    }

    fn run_maintenance(&self) {
        if !self.is_loaded() {
            return;
        }
        if self.config.auto_reclaim {
            if let Err(e) = self.reclaim() {
                tracing::warn!(error = %e, "journal reclaim failed");
            }
            if !self.is_compacting() && self.needs_compaction() {
                if let Err(e) = self.compact() {
                    tracing::warn!(error = %e, "journal compaction failed");
                }
            }
        }
        if let Err(e) = self.fill_pool() {
            tracing::warn!(error = %e, "could not pre-allocate journal files");
        }
    }

    /// Pre-allocates pool files until the journal holds `min_files` files.
    fn fill_pool(&self) -> JournalResult<()> {
        loop {
            let name = {
                let mut files = self.files.lock();
                if files.total() >= self.config.min_files {
                    return Ok(());
                }
                files.allocate_name(&self.config)
            };
            let file = self.create_file(&name)?;
            file.close()?;
            self.files.lock().free.push(file);
        }
    }

    /// Blocks until background work queued so far has finished.
    pub fn flush_background(&self) {
        self.executor.flush();
    }

    // === Compaction hooks ===

    /// Installs a listener notified as compactions progress.
    pub fn set_compaction_listener(&self, listener: Option<Arc<dyn CompactionListener>>) {
        *self.listener.write() = listener;
    }

    /// Asks a running compaction to stop before its file swap.
    pub fn cancel_compaction(&self) {
        self.cancel_compaction.store(true, Ordering::SeqCst);
    }

    /// True while a compaction is running.
    #[must_use]
    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }

    /// Queues a compaction on the background executor.
    pub fn schedule_compact(&self) {
        let this = self.this.clone();
        self.executor.execute(move || {
            if let Some(journal) = this.upgrade() {
                if let Err(e) = journal.compact() {
                    tracing::warn!(error = %e, "scheduled compaction failed");
                }
            }
        });
    }

    fn notify(&self, phase: CompactionPhase) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_phase(phase);
        }
    }

    // === Inspection ===

    /// True if `id` is a live record.
    #[must_use]
    pub fn contains_record(&self, id: u64) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of live records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// IDs of open transactions.
    #[must_use]
    pub fn pending_transactions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.transactions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Per-file accounting, oldest first, current file last.
    #[must_use]
    pub fn file_stats(&self) -> Vec<FileStats> {
        let files = self.files.lock();
        let current = files.current.as_ref().map(|f| f.id());
        files
            .ordered()
            .iter()
            .map(|f| {
                let mut negated: Vec<(FileId, u32)> = f
                    .negated_files()
                    .into_iter()
                    .map(|target| (target, f.neg_count(target)))
                    .collect();
                negated.sort_unstable();
                FileStats {
                    id: f.id(),
                    name: f.name(),
                    live_bytes: f.live_bytes(),
                    pos_count: f.pos_count(),
                    negated,
                    is_current: Some(f.id()) == current,
                    can_reclaim: f.can_reclaim(),
                }
            })
            .collect()
    }

    /// Journal-wide snapshot.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        let mut stats = {
            let files = self.files.lock();
            JournalStats {
                data_files: files.data.len(),
                free_files: files.free.len(),
                current_file: files.current.as_ref().map(|f| f.id()),
                live_bytes: files.ordered().iter().map(|f| f.live_bytes()).sum(),
                ..JournalStats::default()
            }
        };
        stats.live_records = self.records.len();
        stats.pending_transactions = self.transactions.len();
        self.counters.fill(&mut stats);
        stats
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("prefix", &self.config.file_prefix)
            .field("state", &*self.state.lock())
            .field("records", &self.records.len())
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests;
