//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod pages;
pub mod verify;

use crate::dir::{DataDir, JournalNames};
use crate::error::{CliError, CliResult};
use mqstore_journal::{Journal, LoadedJournal};
use mqstore_storage::SequentialFileFactory;
use std::sync::Arc;

/// Output format of the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses `text` or `json`.
    pub fn parse(value: &str) -> CliResult<Self> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::Format(other.to_string())),
        }
    }
}

/// Opens and loads the journal of `dir`. Loading runs recovery, so the
/// directory must be locked.
pub(crate) fn load_journal(dir: &DataDir, names: &JournalNames) -> CliResult<(Arc<Journal>, LoadedJournal)> {
    let journal = Journal::open(names.config(), dir.journal())?;
    let loaded = journal.load()?;
    Ok((journal, loaded))
}

/// Data file names of the journal in sequence order.
pub(crate) fn data_files(factory: &dyn SequentialFileFactory, names: &JournalNames) -> CliResult<Vec<String>> {
    let config = names.config();
    let mut files: Vec<(u64, String)> = factory
        .list_files(&names.extension)?
        .into_iter()
        .filter_map(|name| config.parse_data_file_name(&name).map(|seq| (seq, name)))
        .collect();
    files.sort();
    Ok(files.into_iter().map(|(_, name)| name).collect())
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
