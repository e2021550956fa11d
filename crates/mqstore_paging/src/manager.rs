//! Paging stores for every address.

use crate::error::{PagingError, PagingResult};
use crate::message::PagedMessage;
use crate::page::list_pages;
use crate::settings::PagingConfig;
use crate::storage::{LastPageRecord, PageTransactionInfo, PagingStorage, RecoveredPaging};
use crate::store::{DepageListener, PagingStore};
use crate::transactions::PageTransactions;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mqstore_storage::SequentialFileFactory;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// State every store of a manager shares.
pub(crate) struct PagingShared {
    pub storage: Arc<dyn PagingStorage>,
    pub transactions: PageTransactions,
    pub sync_pages: bool,
    pub max_io: usize,
    global_size: AtomicI64,
    global_max: u64,
}

impl PagingShared {
    pub fn add_global(&self, delta: i64) -> i64 {
        self.global_size.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn global_size(&self) -> i64 {
        self.global_size.load(Ordering::SeqCst)
    }

    pub fn global_exceeded(&self) -> bool {
        self.global_max > 0 && self.global_size() > self.global_max as i64
    }
}

/// Directory name of an address: its bytes in lowercase hex, so any
/// address maps to a valid file name.
#[must_use]
pub fn address_dir(address: &str) -> String {
    address.bytes().map(|b| format!("{b:02x}")).collect()
}

/// Reverses [`address_dir`].
#[must_use]
pub fn parse_address_dir(name: &str) -> Option<String> {
    if name.is_empty() || name.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(name.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Lists every address with a paging directory under `root`, together with
/// its page IDs.
///
/// # Errors
///
/// Returns an error if a directory cannot be listed.
pub fn list_paged_addresses(root: &dyn SequentialFileFactory) -> PagingResult<Vec<(String, Vec<u64>)>> {
    let mut addresses = Vec::new();
    for name in root.list_children()? {
        let Some(address) = parse_address_dir(&name) else {
            tracing::warn!(directory = %name, "ignoring stray paging directory");
            continue;
        };
        let pages = list_pages(root.child(&name)?.as_ref())?;
        addresses.push((address, pages));
    }
    addresses.sort();
    Ok(addresses)
}

/// Owns the paging store of every address and the memory budgets.
///
/// # Example
///
/// ```rust
/// use mqstore_paging::{AddressSettings, PagedMessage, PagingConfig, PagingManager, PagingStorage, PagingResult, PageTransactionInfo, DepageCommit, RecoveredPaging};
/// use mqstore_storage::InMemoryFileFactory;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Debug, Default)]
/// struct Volatile(AtomicU64);
///
/// impl PagingStorage for Volatile {
///     fn generate_id(&self) -> PagingResult<u64> { Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1) }
///     fn store_page_transaction(&self, _: &PageTransactionInfo) -> PagingResult<()> { Ok(()) }
///     fn commit_depage(&self, _: &DepageCommit<'_>) -> PagingResult<()> { Ok(()) }
///     fn message_done(&self, _: u64) -> PagingResult<()> { Ok(()) }
/// }
///
/// let config = PagingConfig::new()
///     .default_settings(AddressSettings::new().max_size_bytes(100).page_size_bytes(4096));
/// let manager = PagingManager::new(config, Arc::new(InMemoryFileFactory::new()), Arc::new(Volatile::default())).unwrap();
/// manager.start(&RecoveredPaging::default()).unwrap();
///
/// manager.report_size_change("orders", 150).unwrap();
/// assert!(manager.is_paging("orders").unwrap());
/// assert!(manager.page("orders", &PagedMessage::new(1, false, b"late".to_vec())).unwrap());
/// ```
pub struct PagingManager {
    config: PagingConfig,
    root: Arc<dyn SequentialFileFactory>,
    shared: Arc<PagingShared>,
    stores: DashMap<String, Arc<PagingStore>>,
    last_pages: RwLock<HashMap<String, LastPageRecord>>,
    listener: RwLock<Option<Arc<dyn DepageListener>>>,
    started: AtomicBool,
}

impl PagingManager {
    /// Creates a manager keeping pages under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PagingError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        config: PagingConfig,
        root: Arc<dyn SequentialFileFactory>,
        storage: Arc<dyn PagingStorage>,
    ) -> PagingResult<Self> {
        config.validate()?;
        let shared = Arc::new(PagingShared {
            storage,
            transactions: PageTransactions::default(),
            sync_pages: config.sync_pages,
            max_io: config.max_io,
            global_size: AtomicI64::new(0),
            global_max: config.global_max_size,
        });
        Ok(Self {
            config,
            root,
            shared,
            stores: DashMap::new(),
            last_pages: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Restores committed page transactions and reopens every address that
    /// still has a paging directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be listed or a store cannot
    /// start.
    pub fn start(&self, recovered: &RecoveredPaging) -> PagingResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for info in &recovered.page_transactions {
            self.shared.transactions.update(*info);
        }
        self.last_pages.write().clone_from(&recovered.last_pages);

        let mut resumed = 0;
        for name in self.root.list_children()? {
            let Some(address) = parse_address_dir(&name) else {
                tracing::warn!(directory = %name, "ignoring stray paging directory");
                continue;
            };
            let store = self.get_page_store(&address)?;
            if store.is_paging() {
                resumed += 1;
            }
        }
        tracing::info!(
            addresses = self.stores.len(),
            paging = resumed,
            page_transactions = self.shared.transactions.committed_count(),
            "paging started"
        );
        Ok(())
    }

    /// Stops every store.
    ///
    /// # Errors
    ///
    /// Returns the first error a store reported.
    pub fn stop(&self) -> PagingResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut result = Ok(());
        for store in self.stores() {
            if let Err(e) = store.stop() {
                tracing::warn!(address = %store.address(), error = %e, "could not stop paging store");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn ensure_started(&self) -> PagingResult<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PagingError::invalid_state("paging manager is not started"))
        }
    }

    /// Returns the store of `address`, creating and starting it on first
    /// use. Concurrent callers get the same store.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager is stopped or the store cannot start.
    pub fn get_page_store(&self, address: &str) -> PagingResult<Arc<PagingStore>> {
        self.ensure_started()?;
        if let Some(store) = self.stores.get(address) {
            return Ok(Arc::clone(store.value()));
        }
        match self.stores.entry(address.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let factory = self.root.child(&address_dir(address))?;
                let store = Arc::new(PagingStore::new(
                    address.to_string(),
                    self.config.settings_for(address).clone(),
                    factory,
                    Arc::clone(&self.shared),
                ));
                store.start(self.last_pages.read().get(address).copied())?;
                store.set_depage_listener(self.listener.read().clone());
                entry.insert(Arc::clone(&store));
                Ok(store)
            }
        }
    }

    /// Adds `delta` bytes to `address` and returns its new size.
    ///
    /// Freed memory triggers depaging of `address` and, when a global budget
    /// is set, of every other paging address.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created or a depage fails.
    pub fn report_size_change(&self, address: &str, delta: i64) -> PagingResult<i64> {
        let store = self.get_page_store(address)?;
        let size = store.add_size(delta);
        if delta < 0 {
            store.depage_available()?;
            if self.config.global_max_size > 0 {
                let others: Vec<Arc<PagingStore>> = self
                    .stores
                    .iter()
                    .filter(|entry| entry.key() != address)
                    .map(|entry| Arc::clone(entry.value()))
                    .collect();
                for other in others.iter().filter(|s| s.is_paging()) {
                    other.depage_available()?;
                }
            }
        }
        Ok(size)
    }

    /// True while `address` pages new messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created.
    pub fn is_paging(&self, address: &str) -> PagingResult<bool> {
        Ok(self.get_page_store(address)?.is_paging())
    }

    /// Pages `message` for `address` if the address is paging.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created or the write fails.
    pub fn page(&self, address: &str, message: &PagedMessage) -> PagingResult<bool> {
        self.get_page_store(address)?.page(message)
    }

    /// Commits producer transaction `tx_id`. If it paged messages, a page
    /// transaction record makes them deliverable.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored. The paged messages
    /// stay undeliverable in that case.
    pub fn commit_page_transaction(&self, tx_id: u64) -> PagingResult<()> {
        let Some(remaining) = self.shared.transactions.finish(tx_id) else {
            return Ok(());
        };
        let info = PageTransactionInfo {
            tx_id,
            record_id: self.shared.storage.generate_id()?,
            remaining,
        };
        self.shared.storage.store_page_transaction(&info)?;
        self.shared.transactions.update(info);
        tracing::debug!(tx_id, remaining, "page transaction committed");
        Ok(())
    }

    /// Rolls back producer transaction `tx_id`. Its paged messages are
    /// discarded when their page is depaged.
    pub fn rollback_page_transaction(&self, tx_id: u64) {
        if let Some(count) = self.shared.transactions.finish(tx_id) {
            tracing::debug!(tx_id, discarded = count, "page transaction rolled back");
        }
    }

    /// Bytes of in-memory messages across all addresses.
    #[must_use]
    pub fn global_size(&self) -> i64 {
        self.shared.global_size()
    }

    /// True while the global budget is exceeded.
    #[must_use]
    pub fn is_global_paging(&self) -> bool {
        self.shared.global_exceeded()
    }

    /// Installs the receiver of depaged messages on every store, current and
    /// future.
    pub fn set_depage_listener(&self, listener: Arc<dyn DepageListener>) {
        *self.listener.write() = Some(Arc::clone(&listener));
        for store in self.stores() {
            store.set_depage_listener(Some(Arc::clone(&listener)));
        }
    }

    /// Every store created so far.
    #[must_use]
    pub fn stores(&self) -> Vec<Arc<PagingStore>> {
        self.stores.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

impl fmt::Debug for PagingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagingManager")
            .field("stores", &self.stores.len())
            .field("global_size", &self.global_size())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for PagingManager {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests;
