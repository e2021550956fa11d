//! Power-loss simulation.
//!
//! [`CrashingFileFactory`] wraps another factory. Once it crashes, every
//! mutating call on it or on any file it created fails, as if the machine
//! lost power: bytes already written stay in the wrapped volume, nothing
//! after the crash reaches it. Reopening the journal over the wrapped
//! factory then plays the restart.
//!
//! ## Usage
//!
//! ```rust
//! use mqstore_storage::{InMemoryFileFactory, SequentialFileFactory};
//! use mqstore_testkit::CrashingFileFactory;
//! use std::sync::Arc;
//!
//! let volume = InMemoryFileFactory::new();
//! let crashing = CrashingFileFactory::new(Arc::new(volume.clone()));
//! let file = crashing.create_sequential_file("a.dat", 1);
//! file.open().unwrap();
//! file.write(b"kept", false).unwrap();
//!
//! crashing.crash();
//! assert!(file.write(b"lost", false).is_err());
//! assert_eq!(volume.file_data("a.dat").unwrap(), b"kept");
//! ```

use mqstore_storage::{SequentialFile, SequentialFileFactory, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const DISARMED: u64 = u64::MAX;

#[derive(Debug)]
struct CrashSwitch {
    crashed: AtomicBool,
    writes_left: AtomicU64,
    tear: AtomicBool,
    refused: AtomicU64,
}

enum Admit {
    Write,
    Partial(usize),
    Refuse,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            crashed: AtomicBool::new(false),
            writes_left: AtomicU64::new(DISARMED),
            tear: AtomicBool::new(false),
            refused: AtomicU64::new(0),
        }
    }

    fn admit(&self, len: usize) -> Admit {
        if self.crashed.load(Ordering::SeqCst) {
            return Admit::Refuse;
        }
        let previous = self
            .writes_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                DISARMED | 0 => None,
                n => Some(n - 1),
            });
        match previous {
            Ok(_) | Err(DISARMED) => Admit::Write,
            Err(_) => {
                self.crashed.store(true, Ordering::SeqCst);
                if self.tear.load(Ordering::SeqCst) && len > 1 {
                    Admit::Partial(len / 2)
                } else {
                    Admit::Refuse
                }
            }
        }
    }

    fn check(&self, operation: &str) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) {
            self.refused.fetch_add(1, Ordering::Relaxed);
            return Err(crash_error(operation));
        }
        Ok(())
    }
}

fn crash_error(operation: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("simulated crash during {operation}"),
    ))
}

/// A factory whose files stop accepting changes after a crash.
#[derive(Debug, Clone)]
pub struct CrashingFileFactory {
    inner: Arc<dyn SequentialFileFactory>,
    switch: Arc<CrashSwitch>,
}

impl CrashingFileFactory {
    /// Wraps `inner`. Nothing fails until [`crash`](Self::crash) or an
    /// armed trigger fires.
    #[must_use]
    pub fn new(inner: Arc<dyn SequentialFileFactory>) -> Self {
        Self {
            inner,
            switch: Arc::new(CrashSwitch::new()),
        }
    }

    /// Crashes now.
    pub fn crash(&self) {
        self.switch.crashed.store(true, Ordering::SeqCst);
    }

    /// Lets `writes` more writes through, then crashes on the next one.
    pub fn crash_after_writes(&self, writes: u64) {
        self.switch.writes_left.store(writes, Ordering::SeqCst);
    }

    /// When set, the write that trips an armed trigger stores its first half
    /// before failing, leaving a torn record behind.
    pub fn tear_on_crash(&self, tear: bool) {
        self.switch.tear.store(tear, Ordering::SeqCst);
    }

    /// Returns whether the crash happened.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.switch.crashed.load(Ordering::SeqCst)
    }

    /// Mutating calls refused since the crash, the tripping write excluded.
    #[must_use]
    pub fn refused_operations(&self) -> u64 {
        self.switch.refused.load(Ordering::Relaxed)
    }

    /// Disarms the trigger and clears the crash.
    pub fn reset(&self) {
        self.switch.crashed.store(false, Ordering::SeqCst);
        self.switch.writes_left.store(DISARMED, Ordering::SeqCst);
        self.switch.tear.store(false, Ordering::SeqCst);
        self.switch.refused.store(0, Ordering::Relaxed);
    }
}

impl SequentialFileFactory for CrashingFileFactory {
    fn create_sequential_file(&self, name: &str, max_io: usize) -> Arc<dyn SequentialFile> {
        Arc::new(CrashingFile {
            inner: self.inner.create_sequential_file(name, max_io),
            switch: Arc::clone(&self.switch),
        })
    }

    fn list_files(&self, extension: &str) -> StorageResult<Vec<String>> {
        self.inner.list_files(extension)
    }

    fn child(&self, name: &str) -> StorageResult<Arc<dyn SequentialFileFactory>> {
        Ok(Arc::new(Self {
            inner: self.inner.child(name)?,
            switch: Arc::clone(&self.switch),
        }))
    }

    fn list_children(&self) -> StorageResult<Vec<String>> {
        self.inner.list_children()
    }

    fn remove_child(&self, name: &str) -> StorageResult<()> {
        self.switch.check("remove_child")?;
        self.inner.remove_child(name)
    }
}

/// A file created by a [`CrashingFileFactory`].
#[derive(Debug)]
pub struct CrashingFile {
    inner: Arc<dyn SequentialFile>,
    switch: Arc<CrashSwitch>,
}

impl SequentialFile for CrashingFile {
    fn file_name(&self) -> String {
        self.inner.file_name()
    }

    fn open(&self) -> StorageResult<()> {
        if !self.inner.exists() {
            self.switch.check("create")?;
        }
        self.inner.open()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> StorageResult<()> {
        self.inner.close()
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn delete(&self) -> StorageResult<()> {
        self.switch.check("delete")?;
        self.inner.delete()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn set_position(&self, position: u64) -> StorageResult<()> {
        self.inner.set_position(position)
    }

    fn write(&self, data: &[u8], sync: bool) -> StorageResult<()> {
        match self.switch.admit(data.len()) {
            Admit::Write => self.inner.write(data, sync),
            Admit::Partial(len) => {
                self.inner.write(&data[..len], false)?;
                Err(crash_error("write"))
            }
            Admit::Refuse => {
                self.switch.refused.fetch_add(1, Ordering::Relaxed);
                Err(crash_error("write"))
            }
        }
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn fill(&self, offset: u64, len: u64, byte: u8) -> StorageResult<()> {
        self.switch.check("fill")?;
        self.inner.fill(offset, len, byte)
    }

    fn sync(&self) -> StorageResult<()> {
        self.switch.check("sync")?;
        self.inner.sync()
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        self.switch.check("truncate")?;
        self.inner.truncate(len)
    }

    fn rename_to(&self, new_name: &str) -> StorageResult<()> {
        self.switch.check("rename")?;
        self.inner.rename_to(new_name)
    }
}
