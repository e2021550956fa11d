//! Per-address paging store.

use crate::error::{PagingError, PagingResult};
use crate::manager::PagingShared;
use crate::message::PagedMessage;
use crate::page::{delete_page, list_pages, read_page, Page};
use crate::settings::AddressSettings;
use crate::storage::{DepageCommit, LastPageRecord, PageTransactionInfo};
use mqstore_storage::SequentialFileFactory;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Receives messages as they come back from pages, in paging order.
pub trait DepageListener: Send + Sync {
    /// Called once per depaged page, after the depage is committed.
    fn on_depage(&self, address: &str, messages: Vec<PagedMessage>);
}

/// Snapshot of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingStoreStats {
    /// Address.
    pub address: String,
    /// Bytes of in-memory messages.
    pub size: i64,
    /// Whether new messages go to pages.
    pub paging: bool,
    /// Pages on disk, the one being written included.
    pub pages: usize,
    /// Last depaged page.
    pub last_depaged_page: Option<u64>,
    /// Messages written to pages since start.
    pub paged_messages: u64,
    /// Messages handed to the listener since start.
    pub depaged_messages: u64,
    /// Messages dropped by the `drop_when_full` policy since start.
    pub dropped_messages: u64,
}

#[derive(Debug, Default)]
struct PageSet {
    started: bool,
    paging: bool,
    /// Closed pages, oldest first.
    closed: VecDeque<u64>,
    /// The page being written. Newer than every closed page.
    current: Option<Page>,
    next_page_id: u64,
    last_page: Option<LastPageRecord>,
}

impl PageSet {
    fn is_drained(&self) -> bool {
        self.closed.is_empty() && self.current.is_none()
    }
}

/// Overflow storage for one address.
///
/// The store is in paging mode once the address exceeds its budget. While
/// paging, [`page`](Self::page) appends messages to numbered page files,
/// and [`depage`](Self::depage) hands them back oldest first.
pub struct PagingStore {
    address: String,
    settings: AddressSettings,
    factory: Arc<dyn SequentialFileFactory>,
    shared: Arc<PagingShared>,
    size: AtomicI64,
    pages: Mutex<PageSet>,
    depage_lock: Mutex<()>,
    listener: RwLock<Option<Arc<dyn DepageListener>>>,
    paged: AtomicU64,
    depaged: AtomicU64,
    dropped: AtomicU64,
}

impl PagingStore {
    pub(crate) fn new(
        address: String,
        settings: AddressSettings,
        factory: Arc<dyn SequentialFileFactory>,
        shared: Arc<PagingShared>,
    ) -> Self {
        Self {
            address,
            settings,
            factory,
            shared,
            size: AtomicI64::new(0),
            pages: Mutex::new(PageSet::default()),
            depage_lock: Mutex::new(()),
            listener: RwLock::new(None),
            paged: AtomicU64::new(0),
            depaged: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Picks up pages left by a previous run.
    ///
    /// Pages up to `last_page` were depaged and committed before a crash
    /// kept them from being deleted; they are deleted without redelivery.
    /// If pages remain the store resumes in paging mode.
    pub(crate) fn start(&self, last_page: Option<LastPageRecord>) -> PagingResult<()> {
        let mut set = self.pages.lock();
        if set.started {
            return Ok(());
        }
        let consumed = last_page.map_or(0, |l| l.page_id);
        let mut remaining = VecDeque::new();
        for id in list_pages(self.factory.as_ref())? {
            if id <= consumed {
                tracing::warn!(address = %self.address, page = id, "deleting page that was already depaged");
                delete_page(self.factory.as_ref(), id)?;
            } else {
                remaining.push_back(id);
            }
        }

        set.next_page_id = remaining.back().copied().unwrap_or(0).max(consumed) + 1;
        set.paging = !remaining.is_empty();
        set.closed = remaining;
        set.last_page = last_page;
        set.started = true;
        if set.paging {
            tracing::info!(address = %self.address, pages = set.closed.len(), "resuming paging");
        }
        Ok(())
    }

    /// Closes the page being written.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be synced or closed.
    pub fn stop(&self) -> PagingResult<()> {
        let mut set = self.pages.lock();
        if let Some(current) = set.current.take() {
            current.close()?;
            set.closed.push_back(current.id());
        }
        set.started = false;
        Ok(())
    }

    /// Returns the address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the settings in effect.
    #[must_use]
    pub fn settings(&self) -> &AddressSettings {
        &self.settings
    }

    /// Bytes of in-memory messages.
    #[must_use]
    pub fn size(&self) -> i64 {
        self.size.load(Ordering::SeqCst)
    }

    /// True while new messages go to pages.
    #[must_use]
    pub fn is_paging(&self) -> bool {
        self.pages.lock().paging
    }

    /// Installs the receiver of depaged messages.
    pub fn set_depage_listener(&self, listener: Option<Arc<dyn DepageListener>>) {
        *self.listener.write() = listener;
    }

    fn is_over_budget(&self) -> bool {
        let max = self.settings.max_size_bytes;
        (max > 0 && self.size() > max as i64) || self.shared.global_exceeded()
    }

    fn is_below_budget(&self) -> bool {
        let max = self.settings.max_size_bytes;
        (max == 0 || self.size() < max as i64) && !self.shared.global_exceeded()
    }

    /// Adds `delta` bytes to the address size and returns the new size.
    ///
    /// Crossing the budget upwards enters paging mode. Going back below it
    /// leaves paging mode only once no page is left.
    pub fn add_size(&self, delta: i64) -> i64 {
        let size = self.size.fetch_add(delta, Ordering::SeqCst) + delta;
        self.shared.add_global(delta);

        if delta > 0 && self.is_over_budget() {
            let mut set = self.pages.lock();
            if !set.paging {
                set.paging = true;
                tracing::info!(address = %self.address, size, "entering paging mode");
            }
        } else if delta < 0 {
            let mut set = self.pages.lock();
            self.leave_paging_if_drained(&mut set);
        }
        size
    }

    fn leave_paging_if_drained(&self, set: &mut PageSet) {
        if set.paging && set.is_drained() && self.is_below_budget() {
            set.paging = false;
            tracing::info!(address = %self.address, size = self.size(), "leaving paging mode");
        }
    }

    /// Writes `message` to the current page if the store is paging.
    ///
    /// Returns false if the store is not paging, in which case the caller
    /// keeps the message in memory. Under the `drop_when_full` policy the
    /// message is discarded and true is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is stopped or the page write fails.
    pub fn page(&self, message: &PagedMessage) -> PagingResult<bool> {
        let mut set = self.pages.lock();
        if !set.started {
            return Err(PagingError::invalid_state(format!(
                "paging store {} is not started",
                self.address
            )));
        }
        if !set.paging {
            return Ok(false);
        }
        if self.settings.drop_when_full {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(address = %self.address, message_id = message.message_id, "dropping message for full address");
            return Ok(true);
        }

        let size = message.encoded_size() as u64;
        let full = set
            .current
            .as_ref()
            .map_or(true, |page| page.size() > 0 && page.size() + size > self.settings.page_size_bytes);
        if full {
            if let Some(done) = set.current.take() {
                done.close()?;
                set.closed.push_back(done.id());
            }
            let id = set.next_page_id;
            set.next_page_id += 1;
            set.current = Some(Page::open(self.factory.as_ref(), id, self.shared.max_io)?);
            tracing::debug!(address = %self.address, page = id, "opened page");
        }
        let Some(page) = set.current.as_mut() else {
            return Err(PagingError::invalid_state("no page to write to"));
        };
        page.write(message, self.shared.sync_pages)?;

        if let Some(tx_id) = message.transaction_id {
            self.shared.transactions.paged(tx_id);
        }
        self.paged.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Moves the oldest page back to the listener.
    ///
    /// Returns false if nothing was depaged: the address is over budget, no
    /// page is left, or the oldest page holds messages of a transaction that
    /// is still open.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be read or the depage cannot be
    /// committed. The page stays in place in that case.
    pub fn depage(&self) -> PagingResult<bool> {
        let _depage = self.depage_lock.lock();
        self.depage_oldest()
    }

    /// Depages until the budget is reached or no page is left. Returns the
    /// number of pages depaged, or 0 if another thread is depaging.
    pub(crate) fn depage_available(&self) -> PagingResult<usize> {
        let Some(_depage) = self.depage_lock.try_lock() else {
            return Ok(0);
        };
        let mut count = 0;
        while self.depage_oldest()? {
            count += 1;
        }
        Ok(count)
    }

    fn depage_oldest(&self) -> PagingResult<bool> {
        if !self.is_below_budget() {
            return Ok(false);
        }
        let (page_id, last_page) = {
            let mut set = self.pages.lock();
            if !set.started {
                return Err(PagingError::invalid_state(format!(
                    "paging store {} is not started",
                    self.address
                )));
            }
            if set.closed.is_empty() {
                if let Some(current) = set.current.take() {
                    current.close()?;
                    set.closed.push_back(current.id());
                }
            }
            match set.closed.front() {
                Some(&id) => (id, set.last_page),
                None => {
                    self.leave_paging_if_drained(&mut set);
                    return Ok(false);
                }
            }
        };

        let messages = read_page(self.factory.as_ref(), page_id)?;
        let transactions = &self.shared.transactions;
        if let Some(open) = messages
            .iter()
            .filter_map(|m| m.transaction_id)
            .find(|&tx_id| transactions.is_open(tx_id))
        {
            tracing::debug!(address = %self.address, page = page_id, tx_id = open, "page waits for open transaction");
            return Ok(false);
        }

        let mut updates: HashMap<u64, PageTransactionInfo> = HashMap::new();
        let mut delivered = Vec::with_capacity(messages.len());
        let mut discarded = 0usize;
        for message in messages {
            let Some(tx_id) = message.transaction_id else {
                delivered.push(message);
                continue;
            };
            match updates.get(&tx_id).copied().or_else(|| transactions.committed(tx_id)) {
                Some(mut info) => {
                    info.remaining = info.remaining.saturating_sub(1);
                    updates.insert(tx_id, info);
                    delivered.push(message);
                }
                None => discarded += 1,
            }
        }

        let record_id = match last_page {
            Some(last) => last.record_id,
            None => self.shared.storage.generate_id()?,
        };
        let last_page = LastPageRecord { record_id, page_id };
        let updates: Vec<PageTransactionInfo> = updates.into_values().collect();
        self.shared.storage.commit_depage(&DepageCommit {
            address: &self.address,
            last_page,
            messages: &delivered,
            page_transactions: &updates,
        })?;
        for info in updates {
            transactions.update(info);
        }
        {
            let mut set = self.pages.lock();
            set.last_page = Some(last_page);
            set.closed.pop_front();
        }

        let count = delivered.len();
        self.depaged.fetch_add(count as u64, Ordering::Relaxed);
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => listener.on_depage(&self.address, delivered),
            None if count > 0 => {
                tracing::warn!(address = %self.address, page = page_id, count, "no depage listener, durable messages remain in the journal");
            }
            None => {}
        }
        if let Err(e) = delete_page(self.factory.as_ref(), page_id) {
            tracing::warn!(address = %self.address, page = page_id, error = %e, "could not delete depaged page");
        }

        {
            let mut set = self.pages.lock();
            self.leave_paging_if_drained(&mut set);
        }
        tracing::debug!(address = %self.address, page = page_id, messages = count, discarded, "depaged");
        Ok(true)
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> PagingStoreStats {
        let set = self.pages.lock();
        PagingStoreStats {
            address: self.address.clone(),
            size: self.size(),
            paging: set.paging,
            pages: set.closed.len() + usize::from(set.current.is_some()),
            last_depaged_page: set.last_page.map(|l| l.page_id),
            paged_messages: self.paged.load(Ordering::Relaxed),
            depaged_messages: self.depaged.load(Ordering::Relaxed),
            dropped_messages: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PagingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagingStore")
            .field("address", &self.address)
            .field("size", &self.size())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Drop for PagingStore {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
