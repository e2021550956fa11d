//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use crate::file::FILE_HEADER_SIZE;

/// Smallest accepted journal file size.
pub const MIN_FILE_SIZE: u64 = 1024;

/// Configuration for a [`crate::Journal`].
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Size every journal file is pre-allocated to.
    pub file_size: u64,

    /// Files (data, current and pooled) kept around instead of deleted.
    pub min_files: usize,

    /// Data files required before compaction is considered.
    pub compact_min_files: usize,

    /// Live-byte percentage below which files are compacted (0 disables).
    pub compact_percentage: u8,

    /// File name prefix, e.g. `mq-data` for `mq-data-3.mqj`.
    pub file_prefix: String,

    /// File name extension without the dot.
    pub file_extension: String,

    /// Writes an asynchronous backend keeps in flight per file.
    pub max_io: usize,

    /// Sync on prepare, commit and rollback regardless of the call's flag.
    pub sync_transactional: bool,

    /// Sync on non-transactional add, update and delete regardless of the call's flag.
    pub sync_non_transactional: bool,

    /// Reclaim dead files (and check compaction) after every rollover.
    pub auto_reclaim: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            file_size: 10 * 1024 * 1024, // 10 MiB
            min_files: 2,
            compact_min_files: 10,
            compact_percentage: 30,
            file_prefix: "mq-data".to_string(),
            file_extension: "mqj".to_string(),
            max_io: 500,
            sync_transactional: true,
            sync_non_transactional: false,
            auto_reclaim: true,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the journal file size.
    #[must_use]
    pub const fn file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// Sets the number of files kept.
    #[must_use]
    pub const fn min_files(mut self, count: usize) -> Self {
        self.min_files = count;
        self
    }

    /// Sets the data-file count that enables compaction.
    #[must_use]
    pub const fn compact_min_files(mut self, count: usize) -> Self {
        self.compact_min_files = count;
        self
    }

    /// Sets the live percentage threshold for compaction.
    #[must_use]
    pub const fn compact_percentage(mut self, percentage: u8) -> Self {
        self.compact_percentage = percentage;
        self
    }

    /// Sets the file name prefix.
    #[must_use]
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Sets the file name extension.
    #[must_use]
    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Sets the in-flight write bound for asynchronous backends.
    #[must_use]
    pub const fn max_io(mut self, max_io: usize) -> Self {
        self.max_io = max_io;
        self
    }

    /// Sets whether transaction completions always sync.
    #[must_use]
    pub const fn sync_transactional(mut self, value: bool) -> Self {
        self.sync_transactional = value;
        self
    }

    /// Sets whether non-transactional writes always sync.
    #[must_use]
    pub const fn sync_non_transactional(mut self, value: bool) -> Self {
        self.sync_non_transactional = value;
        self
    }

    /// Sets whether reclaiming runs after every rollover.
    #[must_use]
    pub const fn auto_reclaim(mut self, value: bool) -> Self {
        self.auto_reclaim = value;
        self
    }

    /// Name of the data file with sequence number `seq`, e.g. `mq-data-3.mqj`.
    #[must_use]
    pub fn data_file_name(&self, seq: u64) -> String {
        format!("{}-{seq}.{}", self.file_prefix, self.file_extension)
    }

    /// Parses a data file name back into its sequence number.
    #[must_use]
    pub fn parse_data_file_name(&self, name: &str) -> Option<u64> {
        name.strip_prefix(self.file_prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.file_extension.as_str())?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    /// Name of the manifest file.
    #[must_use]
    pub fn manifest_name(&self) -> String {
        format!("{}.manifest", self.file_prefix)
    }

    /// Name of the compaction control file.
    #[must_use]
    pub fn control_file_name(&self) -> String {
        format!("{}.ctl", self.file_prefix)
    }

    /// Largest encoded record a file can hold.
    #[must_use]
    pub fn max_record_size(&self) -> usize {
        (self.file_size - FILE_HEADER_SIZE as u64) as usize
    }

    /// Checks the configuration for values the journal cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> JournalResult<()> {
        if self.file_size < MIN_FILE_SIZE {
            return Err(JournalError::invalid_config(format!(
                "file_size must be at least {MIN_FILE_SIZE} bytes, got {}",
                self.file_size
            )));
        }
        if self.file_size > u64::from(u32::MAX) {
            return Err(JournalError::invalid_config(
                "file_size must fit in 32 bits",
            ));
        }
        if self.min_files < 2 {
            return Err(JournalError::invalid_config(format!(
                "min_files must be at least 2, got {}",
                self.min_files
            )));
        }
        if self.compact_percentage > 100 {
            return Err(JournalError::invalid_config(format!(
                "compact_percentage must be between 0 and 100, got {}",
                self.compact_percentage
            )));
        }
        if self.file_prefix.is_empty() || self.file_extension.is_empty() {
            return Err(JournalError::invalid_config(
                "file_prefix and file_extension must not be empty",
            ));
        }
        if self.file_extension == "cmp" || self.file_extension.contains('.') {
            return Err(JournalError::invalid_config(format!(
                "file_extension {:?} is reserved or malformed",
                self.file_extension
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = JournalConfig::default();
        assert_eq!(config.min_files, 2);
        assert!(config.sync_transactional);
        assert!(!config.sync_non_transactional);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = JournalConfig::new()
            .file_size(4096)
            .min_files(3)
            .compact_percentage(50)
            .file_prefix("q");

        assert_eq!(config.file_size, 4096);
        assert_eq!(config.min_files, 3);
        assert_eq!(config.compact_percentage, 50);
        assert_eq!(config.file_prefix, "q");
        assert_eq!(config.max_record_size(), 4096 - FILE_HEADER_SIZE);
    }

    #[test]
    fn rejects_small_files() {
        let err = JournalConfig::new().file_size(512).validate().unwrap_err();
        assert!(matches!(err, JournalError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_single_file() {
        assert!(JournalConfig::new().min_files(1).validate().is_err());
    }

    #[test]
    fn rejects_reserved_extension() {
        assert!(JournalConfig::new().file_extension("cmp").validate().is_err());
    }

    #[test]
    fn file_names() {
        let config = JournalConfig::new().file_prefix("bindings");
        assert_eq!(config.data_file_name(12), "bindings-12.mqj");
        assert_eq!(config.parse_data_file_name("bindings-12.mqj"), Some(12));
        assert_eq!(config.parse_data_file_name("bindings-x.mqj"), None);
        assert_eq!(config.parse_data_file_name("mq-data-12.mqj"), None);
        assert_eq!(config.manifest_name(), "bindings.manifest");
        assert_eq!(config.control_file_name(), "bindings.ctl");
    }
}
