//! Compaction orchestration.

use super::Journal;
use crate::compactor::{
    close_dependencies, delete_outputs, select_candidates, CompactionOutput, CompactionPhase,
    CompactionResult, CompactionTracker, CompactionWriter, CompactorCommand,
};
use crate::control::{ControlEntry, ControlFile};
use crate::error::{JournalError, JournalResult};
use crate::file::JournalFile;
use crate::reader::scan_file;
use crate::record::JournalRecord;
use crate::transaction::{LocationKey, TxOp};
use crate::types::FileId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What phase 1 decided.
struct CompactionPlan {
    candidates: Vec<Arc<JournalFile>>,
    live: HashMap<LocationKey, u64>,
    pending: HashSet<u64>,
    reserved: Vec<(FileId, String)>,
}

impl Journal {
    /// Rewrites the live entries of mostly-dead files into fewer new files.
    ///
    /// Appends, updates and deletes continue while entries are copied. A
    /// record deleted during compaction stays deleted.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CompactionCancelled`] if
    /// [`cancel_compaction`](Self::cancel_compaction) was called before the
    /// swap, [`JournalError::InvalidState`] if another compaction is running,
    /// or an I/O error. On error before the swap the journal is unchanged.
    pub fn compact(&self) -> JournalResult<CompactionResult> {
        self.ensure_loaded()?;
        if self.compacting.swap(true, Ordering::SeqCst) {
            return Err(JournalError::invalid_state("a compaction is already running"));
        }
        self.cancel_compaction.store(false, Ordering::SeqCst);
        let result = self.run_compaction();
        *self.tracker.lock() = None;
        self.compacting.store(false, Ordering::SeqCst);
        result
    }

    fn run_compaction(&self) -> JournalResult<CompactionResult> {
        let Some(plan) = self.plan_compaction()? else {
            return Ok(CompactionResult::default());
        };
        self.notify(CompactionPhase::Started);
        tracing::info!(
            files = plan.candidates.len(),
            live_records = plan.live.len(),
            pending_transactions = plan.pending.len(),
            "compaction started"
        );

        let output = self.copy_candidates(&plan)?;
        self.notify(CompactionPhase::FilesCopied);

        let control = ControlFile {
            old_files: plan
                .candidates
                .iter()
                .map(|f| ControlEntry {
                    file_id: f.id(),
                    name: f.name(),
                })
                .collect(),
            new_files: output
                .files
                .iter()
                .zip(&output.final_names)
                .map(|(f, name)| ControlEntry {
                    file_id: f.id(),
                    name: name.clone(),
                })
                .collect(),
        };
        let control_name = self.control_file_name();
        let swapped = control
            .write(self.factory.as_ref(), &control_name)
            .map(|()| self.notify(CompactionPhase::ControlFileWritten))
            .and_then(|()| self.swap(&output));
        if let Err(e) = swapped {
            if let Err(cleanup) = ControlFile::delete(self.factory.as_ref(), &control_name) {
                tracing::warn!(error = %cleanup, "could not delete compaction control file");
            }
            delete_outputs(&output.files);
            return Err(e);
        }
        self.notify(CompactionPhase::Swapped);

        for (file, name) in output.files.iter().zip(&output.final_names) {
            file.file().rename_to(name)?;
        }
        self.notify(CompactionPhase::FilesRenamed);
        {
            let files = self.files.lock();
            self.save_manifest(&files)?;
        }
        ControlFile::delete(self.factory.as_ref(), &control_name)?;
        for old in &plan.candidates {
            self.retire(old);
        }
        self.counters.record_compaction();
        self.notify(CompactionPhase::Done);

        let result = CompactionResult {
            compacted_files: plan.candidates.len(),
            output_files: output.files.len(),
            records_copied: output.records_copied,
            bytes_copied: output.bytes_copied,
        };
        tracing::info!(
            compacted = result.compacted_files,
            written = result.output_files,
            records = result.records_copied,
            bytes = result.bytes_copied,
            "compaction finished"
        );
        Ok(result)
    }

    /// Phase 1: selects candidates and snapshots them under the write lock.
    fn plan_compaction(&self) -> JournalResult<Option<CompactionPlan>> {
        let _compacting = self.compacting_lock.write();
        let mut files = self.files.lock();
        // Only sealed files qualify; the current file is rolled below, after the
        // output IDs are reserved.
        let sealed = files.data.clone();

        let mut candidates = select_candidates(&sealed, self.config.file_size, self.config.compact_percentage);
        if candidates.is_empty() {
            return Ok(None);
        }
        let tx_files: Vec<(u64, Vec<FileId>)> = self
            .transactions
            .iter()
            .map(|entry| {
                let tx = entry.value().lock();
                (*entry.key(), tx.files().iter().map(|f| f.id()).collect())
            })
            .collect();
        let touched: Vec<Vec<FileId>> = tx_files.iter().map(|(_, ids)| ids.clone()).collect();
        close_dependencies(&sealed, &mut candidates, &touched);

        let pending: HashSet<u64> = tx_files
            .iter()
            .filter(|(_, ids)| ids.iter().any(|id| candidates.contains(id)))
            .map(|(tx_id, _)| *tx_id)
            .collect();
        let live: HashMap<LocationKey, u64> = self
            .records
            .iter()
            .filter(|entry| candidates.contains(&entry.value().file.id()))
            .map(|entry| (entry.value().key(), *entry.key()))
            .collect();
        let candidate_files: Vec<Arc<JournalFile>> = sealed
            .iter()
            .filter(|f| candidates.contains(&f.id()))
            .cloned()
            .collect();

        // Outputs sort after every surviving data file and before the new
        // current file.
        let count = candidate_files.len() as u64;
        let base = self.next_file_id.fetch_add(count, Ordering::SeqCst);
        let reserved = (0..count)
            .map(|i| (FileId::new(base + i), files.allocate_name(&self.config)))
            .collect();
        self.roll_over(&mut files)?;

        *self.tracker.lock() = Some(CompactionTracker::new(candidates, pending.clone()));
        Ok(Some(CompactionPlan {
            candidates: candidate_files,
            live,
            pending,
            reserved,
        }))
    }

    /// Phase 2: copies live and pending entries without holding the lock.
    fn copy_candidates(&self, plan: &CompactionPlan) -> JournalResult<CompactionOutput> {
        let mut writer = CompactionWriter::new(
            Arc::clone(&self.factory),
            self.config.file_size,
            self.config.max_io,
            plan.reserved.clone(),
        );
        for file in &plan.candidates {
            if self.cancel_compaction.load(Ordering::SeqCst) {
                writer.abort();
                tracing::info!("compaction cancelled");
                return Err(JournalError::CompactionCancelled);
            }
            if let Err(e) = copy_file(&mut writer, file, plan) {
                writer.abort();
                return Err(e);
            }
            self.notify(CompactionPhase::FileCompacted(file.id()));
        }
        writer.finish()
    }

    /// Phase 4: points records and open transactions at the new files.
    fn swap(&self, output: &CompactionOutput) -> JournalResult<()> {
        let _compacting = self.compacting_lock.write();
        if self.cancel_compaction.load(Ordering::SeqCst) {
            return Err(JournalError::CompactionCancelled);
        }
        let Some(tracker) = self.tracker.lock().take() else {
            return Err(JournalError::invalid_state("compaction tracker vanished"));
        };
        let candidates = tracker.candidates().clone();
        let is_candidate = |id: FileId| candidates.contains(&id);
        let relocate = |key: &LocationKey| {
            output.relocations.get(key).cloned().ok_or_else(|| {
                JournalError::invalid_state(format!("entry at {} offset {} has no compacted copy", key.0, key.1))
            })
        };

        // Resolve everything before mutating so a failure leaves no trace.
        let mut moved_records = Vec::new();
        for entry in self.records.iter() {
            if is_candidate(entry.value().file.id()) {
                moved_records.push((*entry.key(), relocate(&entry.value().key())?));
            }
        }
        let open: Vec<_> = self
            .transactions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for tx in &open {
            let tx = tx.lock();
            for location in tx.ops().iter().map(TxOp::location) {
                if is_candidate(location.file.id()) {
                    relocate(&location.key())?;
                }
            }
        }

        for (id, location) in moved_records {
            location.file.inc_pos();
            location.file.add_live(location.size);
            self.records.insert(id, location);
        }
        for tx in &open {
            let mut tx = tx.lock();
            for op in tx.ops_mut() {
                let location = op.location_mut();
                if is_candidate(location.file.id()) {
                    *location = relocate(&location.key())?;
                }
            }
            let copies = output.tx_files.get(&tx.id()).cloned().unwrap_or_default();
            if tx.files().iter().any(|f| is_candidate(f.id())) {
                tx.replace_files(&is_candidate, &copies);
            }
        }
        for command in tracker.into_commands() {
            match command {
                CompactorCommand::Negated { target, by, by_file } => {
                    let relocated_by = output.relocations.get(&by).map(|l| Arc::clone(&l.file));
                    if !is_candidate(target.0) {
                        // The target file survives; its negation moves with the copy of `by`.
                        if let Some(negating) = relocated_by {
                            negating.inc_neg(target.0);
                        }
                        continue;
                    }
                    let Some(copy) = output.relocations.get(&target) else {
                        tracing::warn!(file = %target.0, offset = target.1, "negated entry was not copied");
                        continue;
                    };
                    copy.file.inc_pos();
                    relocated_by.unwrap_or(by_file).inc_neg(copy.file.id());
                }
                CompactorCommand::TxCompleted { tx_id, by_file } => {
                    for copy in output.tx_files.get(&tx_id).into_iter().flatten() {
                        copy.inc_pos();
                        by_file.inc_neg(copy.id());
                    }
                }
            }
        }

        let mut files = self.files.lock();
        files.data.retain(|f| !is_candidate(f.id()));
        files.data.extend(output.files.iter().cloned());
        files.data.sort_by_key(|f| f.id());
        for file in files.ordered() {
            file.forget_negations(&is_candidate);
        }
        Ok(())
    }
}

fn copy_file(writer: &mut CompactionWriter, file: &Arc<JournalFile>, plan: &CompactionPlan) -> JournalResult<()> {
    let Some(scan) = scan_file(file.file().as_ref())? else {
        return Ok(());
    };
    for entry in scan.records {
        let key = (file.id(), entry.offset);
        match entry.record {
            JournalRecord::Add { id, user_type, body }
            | JournalRecord::Update { id, user_type, body }
            | JournalRecord::AddTx {
                id, user_type, body, ..
            }
            | JournalRecord::UpdateTx {
                id, user_type, body, ..
            } if plan.live.contains_key(&key) => {
                writer.copy_live(key, id, user_type, body)?;
            }
            record @ (JournalRecord::AddTx { .. }
            | JournalRecord::UpdateTx { .. }
            | JournalRecord::DeleteTx { .. }
            | JournalRecord::Prepare { .. })
                if record.tx_id().is_some_and(|tx| plan.pending.contains(&tx)) =>
            {
                writer.copy_transactional(key, record)?;
            }
            _ => {}
        }
    }
    Ok(())
}
