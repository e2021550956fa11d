//! Page files.

use crate::error::PagingResult;
use crate::message::{decode_entries, PagedMessage};
use mqstore_storage::{SequentialFile, SequentialFileFactory};
use std::sync::Arc;

/// Extension of page files.
pub const PAGE_EXTENSION: &str = "page";

/// Returns the file name of page `id`, e.g. `000000003.page`.
#[must_use]
pub fn page_file_name(id: u64) -> String {
    format!("{id:09}.{PAGE_EXTENSION}")
}

/// Parses a page file name back into its ID.
#[must_use]
pub fn parse_page_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(PAGE_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// One append-only page.
#[derive(Debug)]
pub struct Page {
    id: u64,
    file: Arc<dyn SequentialFile>,
    messages: usize,
}

impl Page {
    /// Opens (creating if needed) page `id` for appending after its last
    /// complete entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn open(factory: &dyn SequentialFileFactory, id: u64, max_io: usize) -> PagingResult<Self> {
        let file = factory.create_sequential_file(&page_file_name(id), max_io);
        file.open()?;
        let (messages, end, torn) = decode_entries(&file.read_all()?);
        if let Some(reason) = torn {
            tracing::warn!(page = id, offset = end, reason, "truncating torn page tail");
            file.truncate(end as u64)?;
        }
        file.set_position(end as u64)?;
        Ok(Self {
            id,
            file,
            messages: messages.len(),
        })
    }

    /// Returns the page ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bytes written so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.file.position()
    }

    /// Messages written so far.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages
    }

    /// Appends `message`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write(&mut self, message: &PagedMessage, sync: bool) -> PagingResult<()> {
        self.file.write(&message.encode(), sync)?;
        self.messages += 1;
        Ok(())
    }

    /// Syncs and closes the page.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync or close fails.
    pub fn close(&self) -> PagingResult<()> {
        if self.file.is_open() {
            self.file.sync()?;
            self.file.close()?;
        }
        Ok(())
    }

    /// Removes the page file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn delete(&self) -> PagingResult<()> {
        self.file.delete()?;
        Ok(())
    }
}

/// Reads every complete message of page `id`, stopping at a torn tail.
///
/// # Errors
///
/// Returns an error if the page cannot be read.
pub fn read_page(factory: &dyn SequentialFileFactory, id: u64) -> PagingResult<Vec<PagedMessage>> {
    let file = factory.create_sequential_file(&page_file_name(id), 1);
    file.open()?;
    let data = file.read_all();
    file.close()?;
    let (messages, end, torn) = decode_entries(&data?);
    if let Some(reason) = torn {
        tracing::warn!(page = id, offset = end, reason, "ignoring torn page tail");
    }
    Ok(messages)
}

/// Lists the page IDs present in `factory`, oldest first.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn list_pages(factory: &dyn SequentialFileFactory) -> PagingResult<Vec<u64>> {
    let mut ids: Vec<u64> = factory
        .list_files(PAGE_EXTENSION)?
        .iter()
        .filter_map(|name| parse_page_file_name(name))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

/// Deletes page `id`.
///
/// # Errors
///
/// Returns an error if the file cannot be removed.
pub fn delete_page(factory: &dyn SequentialFileFactory, id: u64) -> PagingResult<()> {
    factory.create_sequential_file(&page_file_name(id), 1).delete()?;
    Ok(())
}
