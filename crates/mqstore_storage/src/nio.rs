//! Synchronous file backend built on `std::fs`.

use crate::error::{StorageError, StorageResult};
use crate::sequential::{SequentialFile, SequentialFileFactory};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const FILL_CHUNK: usize = 64 * 1024;

/// Factory for [`NioSequentialFile`]s rooted at one directory.
///
/// # Example
///
/// ```no_run
/// use mqstore_storage::{NioFileFactory, SequentialFileFactory};
/// use std::path::Path;
///
/// let factory = NioFileFactory::new(Path::new("journal"));
/// let file = factory.create_sequential_file("data-1.mqj", 1);
/// file.open().unwrap();
/// file.write(b"payload", true).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct NioFileFactory {
    directory: PathBuf,
}

impl NioFileFactory {
    /// Creates a factory for `directory`. The directory is created lazily.
    #[must_use]
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }

    /// Returns the directory this factory manages.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl SequentialFileFactory for NioFileFactory {
    fn create_sequential_file(&self, name: &str, _max_io: usize) -> Arc<dyn SequentialFile> {
        Arc::new(NioSequentialFile::new(&self.directory, name))
    }

    fn list_files(&self, extension: &str) -> StorageResult<Vec<String>> {
        list_dir(&self.directory, |path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension)
        })
    }

    fn child(&self, name: &str) -> StorageResult<Arc<dyn SequentialFileFactory>> {
        let directory = self.directory.join(name);
        fs::create_dir_all(&directory)?;
        Ok(Arc::new(Self { directory }))
    }

    fn list_children(&self) -> StorageResult<Vec<String>> {
        list_dir(&self.directory, |path| path.is_dir())
    }

    fn remove_child(&self, name: &str) -> StorageResult<()> {
        match fs::remove_dir_all(self.directory.join(name)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

pub(crate) fn list_dir(directory: &Path, keep: impl Fn(&Path) -> bool) -> StorageResult<Vec<String>> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if keep(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// A file accessed with positioned blocking writes.
///
/// `write(.., true)` calls `File::sync_data()` before returning.
#[derive(Debug)]
pub struct NioSequentialFile {
    directory: PathBuf,
    name: RwLock<String>,
    file: Mutex<Option<File>>,
    position: AtomicU64,
}

impl NioSequentialFile {
    /// Creates a handle for `directory/name` without opening it.
    #[must_use]
    pub fn new(directory: &Path, name: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            name: RwLock::new(name.to_string()),
            file: Mutex::new(None),
            position: AtomicU64::new(0),
        }
    }

    /// Returns the full path of the file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&*self.name.read())
    }

    fn not_open(&self) -> StorageError {
        StorageError::NotOpen(self.file_name())
    }
}

impl SequentialFile for NioSequentialFile {
    fn file_name(&self) -> String {
        self.name.read().clone()
    }

    fn open(&self) -> StorageResult<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            fs::create_dir_all(&self.directory)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.path())?;
            *guard = Some(file);
        }
        self.position.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    fn close(&self) -> StorageResult<()> {
        if let Some(mut file) = self.file.lock().take() {
            file.flush()?;
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path().exists()
    }

    fn delete(&self) -> StorageResult<()> {
        self.close()?;
        match fs::remove_file(self.path()) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn size(&self) -> StorageResult<u64> {
        if let Some(file) = self.file.lock().as_ref() {
            return Ok(file.metadata()?.len());
        }
        Ok(fs::metadata(self.path())?.len())
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    fn set_position(&self, position: u64) -> StorageResult<()> {
        if !self.is_open() {
            return Err(self.not_open());
        }
        self.position.store(position, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, data: &[u8], sync: bool) -> StorageResult<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.not_open())?;
        let offset = self.position.load(Ordering::SeqCst);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if sync {
            file.sync_data()?;
        }
        self.position.store(offset + data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.not_open())?;
        let size = file.metadata()?.len();
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd {
                name: self.file_name(),
                offset,
                len,
                size,
            });
        }
        let mut buffer = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn fill(&self, offset: u64, len: u64, byte: u8) -> StorageResult<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.not_open())?;
        let chunk = vec![byte; FILL_CHUNK];
        file.seek(SeekFrom::Start(offset))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(FILL_CHUNK as u64) as usize;
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.sync_data()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(|| self.not_open())?;
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or_else(|| self.not_open())?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename_to(&self, new_name: &str) -> StorageResult<()> {
        let mut name = self.name.write();
        fs::rename(self.directory.join(&*name), self.directory.join(new_name))?;
        *name = new_name.to_string();
        Ok(())
    }
}
