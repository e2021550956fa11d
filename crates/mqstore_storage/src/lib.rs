//! # mqstore Storage
//!
//! Sequential file abstraction and I/O backends for the mqstore journal and
//! paging layers.
//!
//! Files are **opaque byte stores**: they know positions, lengths and
//! durability, never journal records or paged messages.
//!
//! ## Available Backends
//!
//! - [`NioFileFactory`] - blocking positioned writes through `std::fs`
//! - [`AioFileFactory`] - a writer thread per file with completion callbacks
//!   and a bounded number of writes in flight
//! - [`InMemoryFileFactory`] - for testing, with shared volumes that survive
//!   a simulated restart
//!
//! ## Example
//!
//! ```rust
//! use mqstore_storage::{InMemoryFileFactory, SequentialFileFactory};
//!
//! let factory = InMemoryFileFactory::new();
//! let file = factory.create_sequential_file("data-1.mqj", 1);
//! file.open().unwrap();
//! file.write(b"hello world", true).unwrap();
//! assert_eq!(file.read_at(6, 5).unwrap(), b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aio;
mod error;
mod memory;
mod nio;
mod sequential;

pub use aio::{AioFileFactory, AioSequentialFile};
pub use error::{StorageError, StorageResult};
pub use memory::{InMemoryFileFactory, InMemorySequentialFile};
pub use nio::{NioFileFactory, NioSequentialFile};
pub use sequential::{IoCallback, SequentialFile, SequentialFileFactory, WaitCallback};
