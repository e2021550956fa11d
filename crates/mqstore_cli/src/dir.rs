//! Broker data directory layout.
//!
//! ```text
//! <data>/
//! ├─ LOCK          # advisory lock, held while a tool runs
//! ├─ journal/      # journal files, manifest and control file
//! └─ paging/       # one directory per paged address
//! ```

use crate::error::{CliError, CliResult};
use fs2::FileExt;
use mqstore_journal::JournalConfig;
use mqstore_storage::{NioFileFactory, SequentialFileFactory};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOCK_FILE: &str = "LOCK";
const JOURNAL_DIR: &str = "journal";
const PAGING_DIR: &str = "paging";

/// An opened data directory.
#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    _lock: Option<File>,
}

impl DataDir {
    /// Opens `path` and takes the directory lock, so the tool never runs
    /// against a live broker.
    pub fn lock(path: &Path) -> CliResult<Self> {
        let path = Self::check(path)?;
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CliError::Locked(path));
        }
        tracing::debug!(path = %path.display(), "locked data directory");
        Ok(Self {
            path,
            _lock: Some(lock),
        })
    }

    /// Opens `path` without locking, for commands that only read.
    pub fn read_only(path: &Path) -> CliResult<Self> {
        Ok(Self {
            path: Self::check(path)?,
            _lock: None,
        })
    }

    fn check(path: &Path) -> CliResult<PathBuf> {
        if !path.is_dir() {
            return Err(CliError::NotFound(path.to_path_buf()));
        }
        Ok(path.to_path_buf())
    }

    /// Root path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Journal directory.
    pub fn journal(&self) -> Arc<dyn SequentialFileFactory> {
        Arc::new(NioFileFactory::new(&self.path.join(JOURNAL_DIR)))
    }

    /// Paging root.
    pub fn paging(&self) -> Arc<dyn SequentialFileFactory> {
        Arc::new(NioFileFactory::new(&self.path.join(PAGING_DIR)))
    }

    /// True if the paging root exists.
    pub fn has_paging(&self) -> bool {
        self.path.join(PAGING_DIR).is_dir()
    }
}

/// Journal naming options shared by the journal commands.
#[derive(Debug, Clone)]
pub struct JournalNames {
    /// File name prefix.
    pub prefix: String,
    /// File name extension.
    pub extension: String,
    /// Journal file size, used when `compact` has to create files.
    pub file_size: u64,
}

impl JournalNames {
    /// The journal configuration these options describe. Reclaiming and
    /// background compaction are off so tools only do what they are asked.
    pub fn config(&self) -> JournalConfig {
        JournalConfig::new()
            .file_prefix(self.prefix.clone())
            .file_extension(self.extension.clone())
            .file_size(self.file_size)
            .auto_reclaim(false)
    }
}
