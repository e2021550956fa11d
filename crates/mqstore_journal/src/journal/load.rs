//! Startup recovery.

use super::{FileSet, Journal, JournalState};
use crate::compactor::COMPACT_SUFFIX;
use crate::control::ControlFile;
use crate::error::{JournalError, JournalResult};
use crate::file::{read_header, JournalFile};
use crate::manifest::JournalManifest;
use crate::reader::{scan_file, ScanEnd, ScannedRecord};
use crate::record::JournalRecord;
use crate::transaction::{JournalTransaction, RecordLocation, TxOp};
use crate::types::{FileId, LoadStats, LoadedJournal, PreparedTransactionInfo, RecordInfo};
use mqstore_storage::SequentialFile;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A transaction seen during replay.
struct ReplayedTransaction {
    tx: JournalTransaction,
    infos: Vec<RecordInfo>,
    extra: Vec<u8>,
    healthy: bool,
}

impl ReplayedTransaction {
    fn new(tx_id: u64) -> Self {
        Self {
            tx: JournalTransaction::new(tx_id),
            infos: Vec::new(),
            extra: Vec::new(),
            healthy: true,
        }
    }

    fn add_op(&mut self, file: &Arc<JournalFile>, op: TxOp, info: RecordInfo) {
        self.tx.touch_file(file);
        self.tx.count_record(file.id());
        self.tx.push(op);
        self.infos.push(info);
    }
}

#[derive(Default)]
struct Replay {
    data: HashMap<u64, RecordInfo>,
    transactions: HashMap<u64, ReplayedTransaction>,
}

impl Replay {
    fn transaction(&mut self, tx_id: u64) -> &mut ReplayedTransaction {
        self.transactions
            .entry(tx_id)
            .or_insert_with(|| ReplayedTransaction::new(tx_id))
    }
}

/// Journal files found on disk, split by header.
struct FoundFiles {
    headed: Vec<(FileId, Arc<dyn SequentialFile>)>,
    pooled: Vec<Arc<dyn SequentialFile>>,
    max_name_seq: Option<u64>,
}

impl Journal {
    /// Replays the journal and makes it ready for appends.
    ///
    /// Finishes or rolls back an interrupted compaction, truncates a torn
    /// tail and rebuilds the file accounting. Transactions that never
    /// completed are discarded; prepared ones are returned and stay open.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::MissingFile`] if a file listed in the manifest
    /// is gone, [`JournalError::InvalidState`] if called twice, or an I/O
    /// error. A journal whose load failed must be dropped.
    pub fn load(&self) -> JournalResult<LoadedJournal> {
        if *self.state.lock() != JournalState::Opened {
            return Err(JournalError::invalid_state("journal can only be loaded once"));
        }
        let _compacting = self.compacting_lock.write();
        match self.load_files() {
            Ok(loaded) => {
                *self.state.lock() = JournalState::Loaded;
                self.schedule_maintenance();
                Ok(loaded)
            }
            Err(e) => {
                *self.state.lock() = JournalState::Stopped;
                Err(e)
            }
        }
    }

    fn load_files(&self) -> JournalResult<LoadedJournal> {
        let mut stats = LoadStats {
            compaction_recovered: self.recover_compaction()?,
            ..LoadStats::default()
        };
        self.remove_stray_files()?;
        let found = self.find_files()?;
        let (headed, recycled) = self.check_manifest(found.headed)?;

        let mut pooled = found.pooled;
        pooled.extend(recycled);
        let highest = headed.last().map(|(id, _)| *id);
        stats.files = headed.len();

        let mut replay = Replay::default();
        let mut opened = Vec::with_capacity(headed.len());
        for (id, file) in headed {
            let is_last = Some(id) == highest;
            let journal_file = Arc::new(JournalFile::new(id, file));
            self.replay_file(&journal_file, is_last, &mut replay, &mut stats)?;
            opened.push(journal_file);
        }

        let prepared = self.finish_transactions(replay.transactions, &mut stats);

        let manifest_max = JournalManifest::load(self.factory.as_ref(), &self.manifest_name())?
            .and_then(|m| m.max_id())
            .map_or(0, FileId::as_u64);
        let next_id = highest.map_or(0, FileId::as_u64).max(manifest_max) + 1;
        self.next_file_id.store(next_id, std::sync::atomic::Ordering::SeqCst);

        {
            let mut files = self.files.lock();
            let current = opened.pop();
            *files = FileSet {
                data: opened,
                current,
                free: pooled,
                next_name: found.max_name_seq.map_or(1, |seq| seq + 1),
            };
            if files.current.is_none() {
                self.roll_over(&mut files)?;
            } else {
                self.save_manifest(&files)?;
            }
        }

        let mut records: Vec<RecordInfo> = replay.data.into_values().collect();
        records.sort_by_key(|r| r.id);

        tracing::info!(
            files = stats.files,
            records = records.len(),
            prepared = prepared.len(),
            torn_tails = stats.torn_tails,
            discarded_transactions = stats.discarded_transactions,
            "journal loaded"
        );
        Ok(LoadedJournal {
            records,
            prepared,
            stats,
        })
    }

    /// Finishes or rolls back a compaction recorded in the control file.
    fn recover_compaction(&self) -> JournalResult<bool> {
        let factory = self.factory.as_ref();
        let control_name = self.control_file_name();
        let control = match ControlFile::read(factory, &control_name)? {
            None => return Ok(false),
            Some(control) => control,
        };

        match control {
            None => {
                tracing::warn!(file = %control_name, "discarding incomplete compaction control file");
            }
            Some(control) => {
                let staged = |name: &str| format!("{name}.{COMPACT_SUFFIX}");
                let complete = control.new_files.iter().all(|entry| {
                    factory.create_sequential_file(&staged(&entry.name), 1).exists()
                        || factory.create_sequential_file(&entry.name, 1).exists()
                });

                if complete {
                    for old in &control.old_files {
                        factory.create_sequential_file(&old.name, 1).delete()?;
                    }
                    for new in &control.new_files {
                        let file = factory.create_sequential_file(&staged(&new.name), 1);
                        if file.exists() {
                            file.rename_to(&new.name)?;
                        }
                    }
                    let mut ids = JournalManifest::load(factory, &self.manifest_name())?
                        .map(|m| m.file_ids)
                        .unwrap_or_default();
                    ids.retain(|id| !control.old_files.iter().any(|old| old.file_id == *id));
                    ids.extend(control.new_files.iter().map(|new| new.file_id));
                    JournalManifest::new(ids).save(factory, &self.manifest_name())?;
                    tracing::info!(
                        replaced = control.old_files.len(),
                        written = control.new_files.len(),
                        "finished interrupted compaction"
                    );
                } else {
                    for new in &control.new_files {
                        factory.create_sequential_file(&staged(&new.name), 1).delete()?;
                    }
                    tracing::warn!("rolled back interrupted compaction");
                }
            }
        }
        ControlFile::delete(factory, &control_name)?;
        Ok(true)
    }

    /// Deletes compaction outputs and manifest temp files no control file
    /// refers to.
    fn remove_stray_files(&self) -> JournalResult<()> {
        let prefix = format!("{}-", self.config.file_prefix);
        for name in self.factory.list_files(COMPACT_SUFFIX)? {
            if name.starts_with(&prefix) {
                tracing::warn!(file = %name, "deleting stray compaction output");
                self.factory.create_sequential_file(&name, 1).delete()?;
            }
        }
        let temp = format!("{}.tmp", self.manifest_name());
        self.factory.create_sequential_file(&temp, 1).delete()?;
        Ok(())
    }

    fn find_files(&self) -> JournalResult<FoundFiles> {
        let mut found = FoundFiles {
            headed: Vec::new(),
            pooled: Vec::new(),
            max_name_seq: None,
        };
        let prefix = format!("{}-", self.config.file_prefix);
        let suffix = format!(".{}", self.config.file_extension);

        for name in self.factory.list_files(&self.config.file_extension)? {
            let Some(seq) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            else {
                continue;
            };
            if let Ok(seq) = seq.parse::<u64>() {
                found.max_name_seq = found.max_name_seq.max(Some(seq));
            }

            let file = self.factory.create_sequential_file(&name, self.config.max_io);
            file.open()?;
            match read_header(file.as_ref())? {
                Some(id) => found.headed.push((id, file)),
                None if file.size()? == self.config.file_size => {
                    file.close()?;
                    found.pooled.push(file);
                }
                None => {
                    tracing::warn!(file = %name, "deleting journal file with no header");
                    file.delete()?;
                }
            }
        }

        found.headed.sort_by_key(|(id, _)| *id);
        if let Some(pair) = found.headed.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(JournalError::corruption(format!(
                "{} and {} share {}",
                pair[0].1.file_name(),
                pair[1].1.file_name(),
                pair[0].0
            )));
        }
        Ok(found)
    }

    /// Splits headed files into those to replay and leftovers for the pool.
    #[allow(clippy::type_complexity)]
    fn check_manifest(
        &self,
        headed: Vec<(FileId, Arc<dyn SequentialFile>)>,
    ) -> JournalResult<(Vec<(FileId, Arc<dyn SequentialFile>)>, Vec<Arc<dyn SequentialFile>>)> {
        let Some(manifest) = JournalManifest::load(self.factory.as_ref(), &self.manifest_name())? else {
            return Ok((headed, Vec::new()));
        };
        for &listed in &manifest.file_ids {
            if !headed.iter().any(|(id, _)| *id == listed) {
                return Err(JournalError::MissingFile { file_id: listed });
            }
        }

        let max = manifest.max_id();
        let mut keep = Vec::with_capacity(headed.len());
        let mut recycled = Vec::new();
        for (id, file) in headed {
            if manifest.contains(id) || Some(id) > max {
                keep.push((id, file));
            } else {
                tracing::debug!(file = %id, name = %file.file_name(), "returning unlisted journal file to the pool");
                file.fill(0, self.config.file_size, 0)?;
                file.close()?;
                recycled.push(file);
            }
        }
        Ok((keep, recycled))
    }

    fn replay_file(
        &self,
        file: &Arc<JournalFile>,
        is_last: bool,
        replay: &mut Replay,
        stats: &mut LoadStats,
    ) -> JournalResult<()> {
        let handle = file.file();
        let scan = scan_file(handle.as_ref())?
            .ok_or_else(|| JournalError::corruption(format!("{} lost its header", file.name())))?;
        stats.records_scanned += scan.records.len();

        if let ScanEnd::Torn(reason) = scan.end {
            if is_last {
                stats.torn_tails += 1;
                tracing::warn!(file = %file.id(), offset = scan.end_position, reason, "truncating torn tail");
            } else {
                tracing::warn!(file = %file.id(), offset = scan.end_position, reason, "ignoring unreadable tail of sealed file");
            }
        }
        if is_last {
            let size = handle.size()?;
            let end = size.max(self.config.file_size);
            if scan.end != ScanEnd::Clean || size < self.config.file_size {
                handle.fill(scan.end_position, end - scan.end_position, 0)?;
            }
            handle.set_position(scan.end_position)?;
        }

        for entry in scan.records {
            self.replay_record(file, entry, replay, stats);
        }
        Ok(())
    }

    fn replay_record(&self, file: &Arc<JournalFile>, entry: ScannedRecord, replay: &mut Replay, stats: &mut LoadStats) {
        let location = RecordLocation {
            file: Arc::clone(file),
            offset: entry.offset,
            size: entry.size,
        };
        match entry.record {
            JournalRecord::Add { id, user_type, body } => {
                self.replay_put(replay, location, id, user_type, body, false);
            }
            JournalRecord::Update { id, user_type, body } => {
                self.replay_put(replay, location, id, user_type, body, true);
            }
            JournalRecord::Delete { id } => {
                self.apply_delete(id, &location);
                replay.data.remove(&id);
            }
            JournalRecord::AddTx {
                tx_id,
                id,
                user_type,
                body,
            } => {
                let info = RecordInfo {
                    id,
                    user_type,
                    data: body,
                    is_update: false,
                };
                replay.transaction(tx_id).add_op(file, TxOp::Put { id, location }, info);
            }
            JournalRecord::UpdateTx {
                tx_id,
                id,
                user_type,
                body,
            } => {
                let info = RecordInfo {
                    id,
                    user_type,
                    data: body,
                    is_update: true,
                };
                replay.transaction(tx_id).add_op(file, TxOp::Put { id, location }, info);
            }
            JournalRecord::DeleteTx { tx_id, id, body } => {
                let info = RecordInfo {
                    id,
                    user_type: 0,
                    data: body,
                    is_update: false,
                };
                replay.transaction(tx_id).add_op(file, TxOp::Delete { id, location }, info);
            }
            JournalRecord::Prepare {
                tx_id,
                record_count,
                extra,
            } => {
                let replayed = replay.transaction(tx_id);
                if replayed.tx.count_in(file.id()) != record_count {
                    replayed.healthy = false;
                }
                replayed.tx.touch_file(file);
                replayed.tx.set_prepared();
                replayed.extra = extra;
            }
            JournalRecord::Commit { tx_id, record_count } => {
                let Some(mut replayed) = replay.transactions.remove(&tx_id) else {
                    return;
                };
                if !replayed.healthy || replayed.tx.count_in(file.id()) != record_count {
                    tracing::warn!(tx_id, file = %file.id(), "discarding committed transaction with missing records");
                    stats.discarded_transactions += 1;
                    replayed.tx.forget();
                    return;
                }
                for (op, info) in replayed.tx.ops().iter().zip(replayed.infos) {
                    match op {
                        TxOp::Put { id, location } => {
                            self.apply_put(*id, location.clone());
                            replay.data.insert(*id, info);
                        }
                        TxOp::Delete { id, location } => {
                            self.apply_delete(*id, location);
                            replay.data.remove(id);
                        }
                    }
                }
                for touched in replayed.tx.files() {
                    file.inc_neg(touched.id());
                }
            }
            JournalRecord::Rollback { tx_id } => {
                if let Some(replayed) = replay.transactions.remove(&tx_id) {
                    for touched in replayed.tx.files() {
                        file.inc_neg(touched.id());
                    }
                }
            }
        }
    }

    fn replay_put(
        &self,
        replay: &mut Replay,
        location: RecordLocation,
        id: u64,
        user_type: u8,
        data: Vec<u8>,
        is_update: bool,
    ) {
        self.apply_put(id, location);
        replay.data.insert(
            id,
            RecordInfo {
                id,
                user_type,
                data,
                is_update,
            },
        );
    }

    /// Keeps healthy prepared transactions open and discards the rest.
    fn finish_transactions(
        &self,
        transactions: HashMap<u64, ReplayedTransaction>,
        stats: &mut LoadStats,
    ) -> Vec<PreparedTransactionInfo> {
        let mut prepared = Vec::new();
        for (tx_id, mut replayed) in transactions {
            if !replayed.tx.is_prepared() || !replayed.healthy {
                tracing::warn!(tx_id, prepared = replayed.tx.is_prepared(), "discarding incomplete transaction");
                stats.discarded_transactions += 1;
                replayed.tx.forget();
                continue;
            }

            let mut info = PreparedTransactionInfo {
                tx_id,
                extra_data: replayed.extra,
                records: Vec::new(),
                records_to_delete: Vec::new(),
            };
            for (op, record) in replayed.tx.ops().iter().zip(replayed.infos) {
                match op {
                    TxOp::Put { .. } => info.records.push(record),
                    TxOp::Delete { .. } => info.records_to_delete.push(record),
                }
            }
            prepared.push(info);
            self.transactions.insert(tx_id, Arc::new(Mutex::new(replayed.tx)));
        }
        prepared.sort_by_key(|p| p.tx_id);
        prepared
    }
}
