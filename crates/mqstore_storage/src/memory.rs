//! In-memory file backend for testing.

use crate::error::{StorageError, StorageResult};
use crate::sequential::{SequentialFile, SequentialFileFactory};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type FileData = Arc<RwLock<Vec<u8>>>;
type Volume = Arc<RwLock<BTreeMap<String, FileData>>>;

/// An in-memory directory tree.
///
/// Clones share the same volume, so a journal reopened over a clone of the
/// factory sees everything the previous instance wrote. Sub-directories are
/// key prefixes.
///
/// # Example
///
/// ```rust
/// use mqstore_storage::{InMemoryFileFactory, SequentialFileFactory};
///
/// let factory = InMemoryFileFactory::new();
/// let file = factory.create_sequential_file("a.dat", 1);
/// file.open().unwrap();
/// file.write(b"test data", true).unwrap();
/// assert_eq!(factory.file_data("a.dat").unwrap(), b"test data");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileFactory {
    volume: Volume,
    prefix: String,
}

impl InMemoryFileFactory {
    /// Creates an empty volume.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the contents of `name`, if it exists.
    #[must_use]
    pub fn file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.volume
            .read()
            .get(&self.key(name))
            .map(|data| data.read().clone())
    }

    /// Replaces the contents of `name`, creating it if needed.
    ///
    /// Useful for simulating torn writes and other damage.
    pub fn set_file_data(&self, name: &str, data: Vec<u8>) {
        let key = self.key(name);
        let mut volume = self.volume.write();
        match volume.get(&key) {
            Some(existing) => *existing.write() = data,
            None => {
                volume.insert(key, Arc::new(RwLock::new(data)));
            }
        }
    }

    /// Removes `name` without going through a file handle.
    pub fn remove_file(&self, name: &str) -> bool {
        self.volume.write().remove(&self.key(name)).is_some()
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

impl SequentialFileFactory for InMemoryFileFactory {
    fn create_sequential_file(&self, name: &str, _max_io: usize) -> Arc<dyn SequentialFile> {
        Arc::new(InMemorySequentialFile {
            volume: Arc::clone(&self.volume),
            prefix: self.prefix.clone(),
            name: RwLock::new(name.to_string()),
            data: Mutex::new(None),
            position: AtomicU64::new(0),
        })
    }

    fn list_files(&self, extension: &str) -> StorageResult<Vec<String>> {
        let suffix = format!(".{extension}");
        Ok(self
            .volume
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .filter(|rest| !rest.contains('/') && rest.ends_with(&suffix))
            .map(str::to_string)
            .collect())
    }

    fn child(&self, name: &str) -> StorageResult<Arc<dyn SequentialFileFactory>> {
        Ok(Arc::new(Self {
            volume: Arc::clone(&self.volume),
            prefix: format!("{}{}/", self.prefix, name),
        }))
    }

    fn list_children(&self) -> StorageResult<Vec<String>> {
        let children: BTreeSet<String> = self
            .volume
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .filter_map(|rest| rest.split_once('/').map(|(dir, _)| dir.to_string()))
            .collect();
        Ok(children.into_iter().collect())
    }

    fn remove_child(&self, name: &str) -> StorageResult<()> {
        let prefix = format!("{}{}/", self.prefix, name);
        self.volume.write().retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}

/// A file stored in an [`InMemoryFileFactory`] volume.
#[derive(Debug)]
pub struct InMemorySequentialFile {
    volume: Volume,
    prefix: String,
    name: RwLock<String>,
    data: Mutex<Option<FileData>>,
    position: AtomicU64,
}

impl InMemorySequentialFile {
    fn key(&self) -> String {
        format!("{}{}", self.prefix, self.name.read())
    }

    fn handle(&self) -> StorageResult<FileData> {
        self.data
            .lock()
            .clone()
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))
    }
}

impl SequentialFile for InMemorySequentialFile {
    fn file_name(&self) -> String {
        self.name.read().clone()
    }

    fn open(&self) -> StorageResult<()> {
        let data = Arc::clone(
            self.volume
                .write()
                .entry(self.key())
                .or_insert_with(|| Arc::new(RwLock::new(Vec::new()))),
        );
        *self.data.lock() = Some(data);
        self.position.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.data.lock().is_some()
    }

    fn close(&self) -> StorageResult<()> {
        self.data.lock().take();
        Ok(())
    }

    fn exists(&self) -> bool {
        self.volume.read().contains_key(&self.key())
    }

    fn delete(&self) -> StorageResult<()> {
        self.close()?;
        self.volume.write().remove(&self.key());
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        if let Some(data) = self.data.lock().as_ref() {
            return Ok(data.read().len() as u64);
        }
        self.volume
            .read()
            .get(&self.key())
            .map(|data| data.read().len() as u64)
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    fn set_position(&self, position: u64) -> StorageResult<()> {
        self.handle()?;
        self.position.store(position, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, bytes: &[u8], _sync: bool) -> StorageResult<()> {
        let data = self.handle()?;
        let mut data = data.write();
        let offset = self.position.load(Ordering::SeqCst) as usize;
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
        self.position.store(end as u64, Ordering::SeqCst);
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.handle()?;
        let data = data.read();
        let size = data.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd {
                name: self.file_name(),
                offset,
                len,
                size,
            });
        }
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn fill(&self, offset: u64, len: u64, byte: u8) -> StorageResult<()> {
        let data = self.handle()?;
        let mut data = data.write();
        let start = offset as usize;
        let end = start + len as usize;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].fill(byte);
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.handle().map(|_| ())
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        let data = self.handle()?;
        data.write().resize(len as usize, 0);
        Ok(())
    }

    fn rename_to(&self, new_name: &str) -> StorageResult<()> {
        let mut volume = self.volume.write();
        let mut name = self.name.write();
        let old_key = format!("{}{}", self.prefix, name);
        let new_key = format!("{}{}", self.prefix, new_name);
        let data = volume
            .remove(&old_key)
            .ok_or_else(|| StorageError::NotOpen(name.clone()))?;
        volume.insert(new_key, data);
        *name = new_name.to_string();
        Ok(())
    }
}
