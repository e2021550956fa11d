//! Sequential file and factory traits.

use crate::error::{StorageError, StorageResult};
use parking_lot::{Condvar, Mutex};
use std::fmt::Debug;
use std::sync::Arc;

/// Completion notification for a submitted write.
///
/// Exactly one of `done` or `on_error` is called per submitted write. For a
/// write submitted with `sync = true`, `done` is only called once the data is
/// durable.
pub trait IoCallback: Send + Sync {
    /// The write completed.
    fn done(&self);

    /// The write failed.
    fn on_error(&self, error: StorageError);
}

/// A single append/random-access file.
///
/// Files are **opaque byte stores**. The journal and paging layers own all
/// format interpretation.
///
/// # Invariants
///
/// - `write` writes at [`position`](Self::position) and advances it
/// - writes to one file complete in submission order
/// - a `write(.., true)` is durable before it returns
/// - files are `Send + Sync` and may be shared between threads
///
/// # Implementors
///
/// - [`crate::NioSequentialFile`] - buffered synchronous file I/O
/// - [`crate::AioSequentialFile`] - writer thread with completion callbacks
/// - [`crate::InMemorySequentialFile`] - for testing
pub trait SequentialFile: Send + Sync + Debug {
    /// Returns the current file name (without directory).
    fn file_name(&self) -> String;

    /// Opens the file, creating it if it does not exist.
    ///
    /// The position is reset to zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    fn open(&self) -> StorageResult<()>;

    /// Returns true if the file is open.
    fn is_open(&self) -> bool;

    /// Closes the file, waiting for pending writes to complete.
    ///
    /// # Errors
    ///
    /// Returns an error if a pending write or the final flush fails.
    fn close(&self) -> StorageResult<()>;

    /// Returns true if the file exists.
    fn exists(&self) -> bool;

    /// Closes and removes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    fn delete(&self) -> StorageResult<()>;

    /// Returns the size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Returns the offset where the next write lands.
    fn position(&self) -> u64;

    /// Moves the write position.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not open.
    fn set_position(&self, position: u64) -> StorageResult<()>;

    /// Writes `data` at the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if the write, or the sync when `sync` is set, fails.
    fn write(&self, data: &[u8], sync: bool) -> StorageResult<()>;

    /// Submits `data` at the current position and reports through `callback`.
    ///
    /// Backends without asynchronous support complete the write inline.
    fn write_with_callback(&self, data: Vec<u8>, sync: bool, callback: Arc<dyn IoCallback>) {
        match self.write(&data, sync) {
            Ok(()) => callback.done(),
            Err(e) => callback.on_error(e),
        }
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the file.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Writes `len` copies of `byte` starting at `offset`.
    ///
    /// Does not move the write position.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn fill(&self, offset: u64, len: u64, byte: u8) -> StorageResult<()>;

    /// Makes every completed write durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&self) -> StorageResult<()>;

    /// Truncates or extends the file to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be set.
    fn truncate(&self, len: u64) -> StorageResult<()>;

    /// Renames the file within its directory, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    fn rename_to(&self, new_name: &str) -> StorageResult<()>;
}

/// Creates and enumerates [`SequentialFile`]s in one directory.
pub trait SequentialFileFactory: Send + Sync + Debug {
    /// Creates a handle for `name`. The file is not opened.
    ///
    /// `max_io` bounds the writes an asynchronous backend keeps in flight.
    fn create_sequential_file(&self, name: &str, max_io: usize) -> Arc<dyn SequentialFile>;

    /// Lists file names ending in `.{extension}`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list_files(&self, extension: &str) -> StorageResult<Vec<String>>;

    /// Returns a factory for the sub-directory `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the sub-directory cannot be created.
    fn child(&self, name: &str) -> StorageResult<Arc<dyn SequentialFileFactory>>;

    /// Lists sub-directory names, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn list_children(&self) -> StorageResult<Vec<String>>;

    /// Removes the sub-directory `name` and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove_child(&self, name: &str) -> StorageResult<()>;
}

/// An [`IoCallback`] a thread can block on until the write completes.
#[derive(Default)]
pub struct WaitCallback {
    state: Mutex<Option<Result<(), StorageError>>>,
    cond: Condvar,
}

impl WaitCallback {
    /// Creates a callback with no outcome yet.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until the write completes and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the error reported through [`IoCallback::on_error`].
    pub fn wait(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.cond.wait(&mut state);
        }
        state.take().unwrap_or(Ok(()))
    }

    fn complete(&self, outcome: Result<(), StorageError>) {
        *self.state.lock() = Some(outcome);
        self.cond.notify_all();
    }
}

impl IoCallback for WaitCallback {
    fn done(&self) {
        self.complete(Ok(()));
    }

    fn on_error(&self, error: StorageError) {
        self.complete(Err(error));
    }
}
