//! Online compaction building blocks.
//!
//! Compaction runs in phases:
//!
//! 1. Under the compaction write lock: pick candidate files, close the set
//!    under dependencies, snapshot what is live and reserve output file IDs.
//! 2. Without the lock: copy live entries into `.cmp` files. Mutations that
//!    touch candidate files are recorded as [`CompactorCommand`]s.
//! 3. Write the control file.
//! 4. Under the write lock: move records and open transactions onto the new
//!    files and replay the buffered commands.
//! 5. Rename the new files, update the manifest, delete the control file and
//!    recycle the old files.
//!
//! The orchestration lives in `Journal::compact`; this module holds the
//! pieces that do not need the journal's internals.

use crate::error::JournalResult;
use crate::file::{write_header, JournalFile};
use crate::record::JournalRecord;
use crate::transaction::{LocationKey, RecordLocation};
use crate::types::FileId;
use mqstore_storage::SequentialFileFactory;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Suffix of compaction output files until the swap.
pub const COMPACT_SUFFIX: &str = "cmp";

/// Progress points reported to a [`CompactionListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPhase {
    /// Candidates are selected and the snapshot is taken.
    Started,
    /// One candidate file has been copied.
    FileCompacted(FileId),
    /// Every candidate has been copied and the outputs are synced.
    FilesCopied,
    /// The control file is durable.
    ControlFileWritten,
    /// The in-memory state now refers to the new files.
    Swapped,
    /// The `.cmp` files carry their final names.
    FilesRenamed,
    /// The control file is gone and the old files are recycled.
    Done,
}

/// Observer of compaction progress.
pub trait CompactionListener: Send + Sync {
    /// Called as compaction passes `phase`.
    fn on_phase(&self, phase: CompactionPhase);
}

/// Statistics of a finished compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Files replaced.
    pub compacted_files: usize,
    /// Files written.
    pub output_files: usize,
    /// Entries copied.
    pub records_copied: usize,
    /// Bytes copied.
    pub bytes_copied: u64,
}

/// Mutation observed while a compaction copies.
#[derive(Debug)]
pub(crate) enum CompactorCommand {
    /// The entry at `target` was superseded or deleted by the entry at `by`,
    /// and at least one of the two sits in a candidate file.
    Negated {
        target: LocationKey,
        by: LocationKey,
        by_file: Arc<JournalFile>,
    },
    /// A transaction with entries in candidate files completed in `by_file`.
    TxCompleted { tx_id: u64, by_file: Arc<JournalFile> },
}

/// State shared between a running compaction and concurrent mutators.
#[derive(Debug, Default)]
pub(crate) struct CompactionTracker {
    candidates: HashSet<FileId>,
    pending_txs: HashSet<u64>,
    commands: Vec<CompactorCommand>,
}

impl CompactionTracker {
    pub fn new(candidates: HashSet<FileId>, pending_txs: HashSet<u64>) -> Self {
        Self {
            candidates,
            pending_txs,
            commands: Vec::new(),
        }
    }

    pub fn is_candidate(&self, id: FileId) -> bool {
        self.candidates.contains(&id)
    }

    pub fn candidates(&self) -> &HashSet<FileId> {
        &self.candidates
    }

    /// Records a negation that touches a candidate file on either side.
    pub fn on_negated(&mut self, target: &RecordLocation, by: &RecordLocation) {
        if self.is_candidate(target.file.id()) || self.is_candidate(by.file.id()) {
            self.commands.push(CompactorCommand::Negated {
                target: target.key(),
                by: by.key(),
                by_file: Arc::clone(&by.file),
            });
        }
    }

    pub fn on_tx_completed(&mut self, tx_id: u64, by_file: &Arc<JournalFile>) {
        if self.pending_txs.contains(&tx_id) {
            self.commands.push(CompactorCommand::TxCompleted {
                tx_id,
                by_file: Arc::clone(by_file),
            });
        }
    }

    pub fn into_commands(self) -> Vec<CompactorCommand> {
        self.commands
    }
}

/// Files whose live ratio is below `percentage`.
pub(crate) fn select_candidates(files: &[Arc<JournalFile>], file_size: u64, percentage: u8) -> HashSet<FileId> {
    let threshold = i128::from(file_size) * i128::from(percentage);
    files
        .iter()
        .filter(|f| i128::from(f.live_bytes()) * 100 < threshold)
        .map(|f| f.id())
        .collect()
}

/// Grows `candidates` until no candidate negates a non-candidate and no
/// open transaction straddles the boundary.
///
/// `tx_files` holds, per open transaction, the files it touches.
pub(crate) fn close_dependencies(
    files: &[Arc<JournalFile>],
    candidates: &mut HashSet<FileId>,
    tx_files: &[Vec<FileId>],
) {
    let present: HashSet<FileId> = files.iter().map(|f| f.id()).collect();
    loop {
        let mut added = Vec::new();
        for file in files.iter().filter(|f| candidates.contains(&f.id())) {
            for target in file.negated_files() {
                if present.contains(&target) && !candidates.contains(&target) {
                    added.push(target);
                }
            }
        }
        for touched in tx_files {
            if touched.iter().any(|id| candidates.contains(id)) {
                added.extend(
                    touched
                        .iter()
                        .filter(|id| present.contains(id) && !candidates.contains(id)),
                );
            }
        }
        if added.is_empty() {
            return;
        }
        candidates.extend(added);
    }
}

/// Everything the copy phase produced.
#[derive(Debug, Default)]
pub(crate) struct CompactionOutput {
    pub files: Vec<Arc<JournalFile>>,
    pub final_names: Vec<String>,
    pub relocations: HashMap<LocationKey, RecordLocation>,
    pub tx_files: HashMap<u64, Vec<Arc<JournalFile>>>,
    pub records_copied: usize,
    pub bytes_copied: u64,
}

/// Writes compacted records into `.cmp` files with pre-reserved IDs.
#[derive(Debug)]
pub(crate) struct CompactionWriter {
    factory: Arc<dyn SequentialFileFactory>,
    file_size: u64,
    max_io: usize,
    reserved: VecDeque<(FileId, String)>,
    current: Option<Arc<JournalFile>>,
    tx_counts: HashMap<(u64, FileId), u32>,
    output: CompactionOutput,
}

impl CompactionWriter {
    /// `reserved` pairs each output file ID with its final name.
    pub fn new(
        factory: Arc<dyn SequentialFileFactory>,
        file_size: u64,
        max_io: usize,
        reserved: Vec<(FileId, String)>,
    ) -> Self {
        Self {
            factory,
            file_size,
            max_io,
            reserved: reserved.into(),
            current: None,
            tx_counts: HashMap::new(),
            output: CompactionOutput::default(),
        }
    }

    /// Copies a live record as a plain ADD.
    pub fn copy_live(&mut self, from: LocationKey, id: u64, user_type: u8, body: Vec<u8>) -> JournalResult<()> {
        let location = self.write(JournalRecord::Add { id, user_type, body })?;
        self.output.relocations.insert(from, location);
        Ok(())
    }

    /// Copies a record of an open transaction unchanged, or a PREPARE with
    /// its count recomputed for the output file.
    pub fn copy_transactional(&mut self, from: LocationKey, record: JournalRecord) -> JournalResult<()> {
        let Some(tx_id) = record.tx_id() else {
            return Ok(());
        };
        let is_data = record.record_id().is_some();
        let location = self.write(record)?;

        let files = self.output.tx_files.entry(tx_id).or_default();
        if !files.iter().any(|f| f.id() == location.file.id()) {
            files.push(Arc::clone(&location.file));
        }
        if is_data {
            *self.tx_counts.entry((tx_id, location.file.id())).or_insert(0) += 1;
            self.output.relocations.insert(from, location);
        }
        Ok(())
    }

    fn write(&mut self, mut record: JournalRecord) -> JournalResult<RecordLocation> {
        let size = record.encoded_size() as u64;
        let file = match &self.current {
            Some(file) if file.file().position() + size <= self.file_size => Arc::clone(file),
            _ => self.next_file()?,
        };
        if let JournalRecord::Prepare {
            tx_id, record_count, ..
        } = &mut record
        {
            *record_count = self.tx_counts.get(&(*tx_id, file.id())).copied().unwrap_or(0);
        }
        let offset = file.file().position();
        file.file().write(&record.encode(file.id()), false)?;
        self.output.records_copied += 1;
        self.output.bytes_copied += size;
        Ok(RecordLocation {
            file,
            offset,
            size: size as u32,
        })
    }

    fn next_file(&mut self) -> JournalResult<Arc<JournalFile>> {
        if let Some(done) = &self.current {
            done.file().sync()?;
        }
        let Some((id, name)) = self.reserved.pop_front() else {
            return Err(crate::error::JournalError::invalid_state(
                "compaction ran out of reserved file IDs",
            ));
        };
        let file = self
            .factory
            .create_sequential_file(&format!("{name}.{COMPACT_SUFFIX}"), self.max_io);
        file.open()?;
        file.truncate(0)?;
        file.fill(0, self.file_size, 0)?;
        write_header(file.as_ref(), id)?;

        let journal_file = Arc::new(JournalFile::new(id, file));
        self.output.files.push(Arc::clone(&journal_file));
        self.output.final_names.push(name);
        self.current = Some(Arc::clone(&journal_file));
        Ok(journal_file)
    }

    /// Syncs the outputs and hands them over.
    /// On failure the outputs are deleted.
    pub fn finish(self) -> JournalResult<CompactionOutput> {
        let synced = self.current.as_ref().map_or(Ok(()), |last| last.file().sync());
        if let Err(e) = synced {
            self.abort();
            return Err(e.into());
        }
        Ok(self.output)
    }

    /// Deletes every output written so far.
    pub fn abort(self) {
        delete_outputs(&self.output.files);
    }
}

/// Best-effort removal of compaction outputs.
pub(crate) fn delete_outputs(files: &[Arc<JournalFile>]) {
    for file in files {
        if let Err(e) = file.file().delete() {
            tracing::warn!(file = %file.name(), error = %e, "could not delete compaction output");
        }
    }
}
