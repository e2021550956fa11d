//! Paging configuration.

use crate::error::{PagingError, PagingResult};
use std::collections::HashMap;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: u64 = 1024;

/// Memory budget and paging policy of one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSettings {
    /// Bytes of in-memory messages above which the address pages (0 = no
    /// limit).
    pub max_size_bytes: u64,

    /// Size at which the current page is closed and a new one opened.
    pub page_size_bytes: u64,

    /// Discard messages instead of paging them while the address is full.
    pub drop_when_full: bool,
}

impl Default for AddressSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 0,
            page_size_bytes: 10 * 1024 * 1024, // 10 MiB
            drop_when_full: false,
        }
    }
}

impl AddressSettings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the memory budget.
    #[must_use]
    pub const fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size_bytes(mut self, bytes: u64) -> Self {
        self.page_size_bytes = bytes;
        self
    }

    /// Sets the drop policy.
    #[must_use]
    pub const fn drop_when_full(mut self, value: bool) -> Self {
        self.drop_when_full = value;
        self
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> PagingResult<()> {
        if self.page_size_bytes < MIN_PAGE_SIZE {
            return Err(PagingError::invalid_config(format!(
                "page_size_bytes must be at least {MIN_PAGE_SIZE}, got {}",
                self.page_size_bytes
            )));
        }
        Ok(())
    }
}

/// Configuration for a [`crate::PagingManager`].
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// Bytes of in-memory messages across all addresses above which every
    /// address pages (0 = no limit).
    pub global_max_size: u64,

    /// Settings for addresses without an entry in `addresses`.
    pub default_settings: AddressSettings,

    /// Per-address overrides.
    pub addresses: HashMap<String, AddressSettings>,

    /// Sync page writes.
    pub sync_pages: bool,

    /// Writes an asynchronous backend keeps in flight per page file.
    pub max_io: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            global_max_size: 0,
            default_settings: AddressSettings::default(),
            addresses: HashMap::new(),
            sync_pages: false,
            max_io: 1,
        }
    }
}

impl PagingConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the global budget.
    #[must_use]
    pub const fn global_max_size(mut self, bytes: u64) -> Self {
        self.global_max_size = bytes;
        self
    }

    /// Sets the settings used by addresses without an override.
    #[must_use]
    pub fn default_settings(mut self, settings: AddressSettings) -> Self {
        self.default_settings = settings;
        self
    }

    /// Overrides the settings of `address`.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>, settings: AddressSettings) -> Self {
        self.addresses.insert(address.into(), settings);
        self
    }

    /// Sets whether page writes sync.
    #[must_use]
    pub const fn sync_pages(mut self, value: bool) -> Self {
        self.sync_pages = value;
        self
    }

    /// Returns the settings that apply to `address`.
    #[must_use]
    pub fn settings_for(&self, address: &str) -> &AddressSettings {
        self.addresses.get(address).unwrap_or(&self.default_settings)
    }

    /// Checks the default and every per-address setting.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> PagingResult<()> {
        self.default_settings.validate()?;
        for (address, settings) in &self.addresses {
            settings.validate().map_err(|e| {
                PagingError::invalid_config(format!("address {address:?}: {e}"))
            })?;
        }
        if self.max_io == 0 {
            return Err(PagingError::invalid_config("max_io must be at least 1"));
        }
        Ok(())
    }
}
