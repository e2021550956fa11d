//! # mqstore Paging
//!
//! Spills messages to disk per address once the address, or the broker as a
//! whole, exceeds its memory budget, and brings them back in their original
//! order when memory frees up.
//!
//! ## Layout
//!
//! Every address owns a directory named after the hex encoding of the
//! address. Pages inside it are numbered from 1:
//!
//! ```text
//! paging/
//! ├── 71756575652f6f7264657273/     # "queue/orders"
//! │   ├── 000000004.page
//! │   └── 000000005.page
//! ```
//!
//! ## Durability
//!
//! Depaging a page first commits a journal transaction holding the page's
//! durable messages and the address's last depaged page ID. Only then are
//! the messages handed to the [`DepageListener`] and the page file deleted.
//! A page left behind by a crash after the commit is recognised on restart
//! by its ID and deleted without redelivery.
//!
//! Messages paged inside a producer transaction are delivered only if the
//! transaction committed; see [`PagingManager::commit_page_transaction`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod manager;
mod message;
mod page;
mod queue;
mod settings;
mod storage;
mod store;
mod transactions;

pub use error::{PagingError, PagingResult};
pub use manager::{address_dir, list_paged_addresses, parse_address_dir, PagingManager};
pub use message::{decode_entries, PageEntry, PagedMessage};
pub use page::{delete_page, list_pages, page_file_name, parse_page_file_name, read_page, Page, PAGE_EXTENSION};
pub use queue::{Delivery, MemoryQueue, QueueCounts};
pub use settings::{AddressSettings, PagingConfig, MIN_PAGE_SIZE};
pub use storage::{
    DepageCommit, JournalPagingStorage, LastPageRecord, PageTransactionInfo, PagingStorage, RecoveredPaging,
    LAST_PAGE_RECORD_TYPE, PAGED_MESSAGE_RECORD_TYPE, PAGE_TRANSACTION_RECORD_TYPE,
};
pub use store::{DepageListener, PagingStore, PagingStoreStats};
