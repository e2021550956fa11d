//! Asynchronous file backend.
//!
//! Each open [`AioSequentialFile`] owns a writer thread fed through a bounded
//! `crossbeam` channel. The channel capacity is the file's `max_io`, so a
//! producer submitting more than `max_io` outstanding writes blocks until the
//! writer catches up. Completions are reported through [`IoCallback`] in
//! submission order.

use crate::error::{StorageError, StorageResult};
use crate::nio::list_dir;
use crate::sequential::{IoCallback, SequentialFile, SequentialFileFactory, WaitCallback};
use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Factory for [`AioSequentialFile`]s rooted at one directory.
#[derive(Debug, Clone)]
pub struct AioFileFactory {
    directory: PathBuf,
}

impl AioFileFactory {
    /// Creates a factory for `directory`.
    #[must_use]
    pub fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_path_buf(),
        }
    }
}

impl SequentialFileFactory for AioFileFactory {
    fn create_sequential_file(&self, name: &str, max_io: usize) -> Arc<dyn SequentialFile> {
        Arc::new(AioSequentialFile::new(&self.directory, name, max_io))
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

struct WriteTask {
    offset: u64,
    data: Vec<u8>,
    sync: bool,
    callback: Arc<dyn IoCallback>,
}

struct Writer {
    sender: Sender<WriteTask>,
    handle: JoinHandle<()>,
}

/// Counts writes submitted but not yet completed.
#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Inflight {
    fn begin(&self) {
        *self.count.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_drained(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

/// A file whose writes are performed by a dedicated writer thread.
pub struct AioSequentialFile {
    directory: PathBuf,
    name: RwLock<String>,
    max_io: usize,
    file: Arc<Mutex<Option<File>>>,
    position: AtomicU64,
    writer: Mutex<Option<Writer>>,
    inflight: Arc<Inflight>,
}

impl std::fmt::Debug for AioSequentialFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AioSequentialFile")
            .field("name", &*self.name.read())
            .field("max_io", &self.max_io)
            .field("position", &self.position.load(Ordering::SeqCst))
            .finish()
    }
}

impl AioSequentialFile {
    /// Creates a handle for `directory/name` without opening it.
    #[must_use]
    pub fn new(directory: &Path, name: &str, max_io: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            name: RwLock::new(name.to_string()),
            max_io: max_io.max(1),
            file: Arc::new(Mutex::new(None)),
            position: AtomicU64::new(0),
            writer: Mutex::new(None),
            inflight: Arc::new(Inflight::default()),
        }
    }

    fn path(&self) -> PathBuf {
        self.directory.join(&*self.name.read())
    }

    fn spawn_writer(&self) -> StorageResult<Writer> {
        let (sender, receiver) = channel::bounded::<WriteTask>(self.max_io);
        let file = Arc::clone(&self.file);
        let inflight = Arc::clone(&self.inflight);
        let handle = thread::Builder::new()
            .name(format!("aio-{}", self.file_name()))
            .spawn(move || {
                for task in receiver {
                    match write_task(&file, &task) {
                        Ok(()) => task.callback.done(),
                        Err(e) => task.callback.on_error(e),
                    }
                    inflight.end();
                }
            })?;
        Ok(Writer { sender, handle })
    }

    fn stop_writer(&self) {
        if let Some(writer) = self.writer.lock().take() {
            drop(writer.sender);
            if writer.handle.join().is_err() {
                warn!(file = %self.file_name(), "aio writer thread panicked");
            }
        }
    }
}

fn write_task(file: &Mutex<Option<File>>, task: &WriteTask) -> StorageResult<()> {
    let mut guard = file.lock();
    let file = guard
        .as_mut()
        .ok_or_else(|| StorageError::AsyncWrite("file closed before write".into()))?;
    file.seek(SeekFrom::Start(task.offset))?;
    file.write_all(&task.data)?;
    if task.sync {
        file.sync_data()?;
    }
    Ok(())
}

impl SequentialFile for AioSequentialFile {
    fn file_name(&self) -> String {
        self.name.read().clone()
    }

    fn open(&self) -> StorageResult<()> {
        {
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
        }
        let mut writer = self.writer.lock();
        if writer.is_none() {
            *writer = Some(self.spawn_writer()?);
        }
        self.position.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    fn close(&self) -> StorageResult<()> {
        self.inflight.wait_drained();
        self.stop_writer();
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
        self.inflight.wait_drained();
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
            return Err(StorageError::NotOpen(self.file_name()));
        }
        self.inflight.wait_drained();
        self.position.store(position, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, data: &[u8], sync: bool) -> StorageResult<()> {
        let callback = WaitCallback::new();
        self.write_with_callback(data.to_vec(), sync, callback.clone());
        callback.wait()
    }

    fn write_with_callback(&self, data: Vec<u8>, sync: bool, callback: Arc<dyn IoCallback>) {
        let writer = self.writer.lock();
        let Some(writer) = writer.as_ref() else {
            callback.on_error(StorageError::NotOpen(self.file_name()));
            return;
        };
        let offset = self
            .position
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        self.inflight.begin();
        let task = WriteTask {
            offset,
            data,
            sync,
            callback,
        };
        if let Err(err) = writer.sender.send(task) {
            self.inflight.end();
            err.into_inner()
                .callback
                .on_error(StorageError::Closed(self.file_name()));
        }
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inflight.wait_drained();
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))?;
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
        self.inflight.wait_drained();
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))?;
        file.seek(SeekFrom::Start(offset))?;
        let chunk = vec![byte; 64 * 1024];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        file.sync_data()?;
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        self.inflight.wait_drained();
        let guard = self.file.lock();
        let file = guard
            .as_ref()
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))?;
        file.sync_all()?;
        Ok(())
    }

    fn truncate(&self, len: u64) -> StorageResult<()> {
        self.inflight.wait_drained();
        let guard = self.file.lock();
        let file = guard
            .as_ref()
            .ok_or_else(|| StorageError::NotOpen(self.file_name()))?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename_to(&self, new_name: &str) -> StorageResult<()> {
        self.inflight.wait_drained();
        let mut name = self.name.write();
        fs::rename(self.directory.join(&*name), self.directory.join(new_name))?;
        *name = new_name.to_string();
        Ok(())
    }
}

impl Drop for AioSequentialFile {
    fn drop(&mut self) {
        self.stop_writer();
    }
}
