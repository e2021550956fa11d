//! Pages command implementation.

use super::{format_size, Format};
use crate::dir::DataDir;
use crate::error::CliResult;
use mqstore_paging::{address_dir, list_paged_addresses, read_page};
use serde::Serialize;

/// Paging state of one address.
#[derive(Debug, Serialize)]
pub struct AddressPages {
    /// Address.
    pub address: String,
    /// Directory under the paging root.
    pub directory: String,
    /// Page IDs, oldest first.
    pub pages: Vec<u64>,
    /// Complete messages across all pages.
    pub messages: usize,
    /// Message bytes across all pages.
    pub bytes: u64,
}

/// Runs the pages command.
pub fn run(dir: &DataDir, format: Format) -> CliResult<()> {
    let mut report = Vec::new();
    if dir.has_paging() {
        let root = dir.paging();
        for (address, pages) in list_paged_addresses(root.as_ref())? {
            let directory = address_dir(&address);
            let store = root.child(&directory)?;
            let mut messages = 0;
            let mut bytes = 0;
            for &id in &pages {
                let page = read_page(store.as_ref(), id)?;
                messages += page.len();
                bytes += page.iter().map(|m| m.encoded_size() as u64).sum::<u64>();
            }
            report.push(AddressPages {
                address,
                directory,
                pages,
                messages,
                bytes,
            });
        }
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text if report.is_empty() => println!("No paged addresses"),
        Format::Text => {
            for entry in &report {
                let range = match (entry.pages.first(), entry.pages.last()) {
                    (Some(first), Some(last)) => format!("pages {first}..={last}"),
                    _ => "no pages".to_string(),
                };
                println!(
                    "{} ({}): {} page(s), {range}, {} message(s), {}",
                    entry.address,
                    entry.directory,
                    entry.pages.len(),
                    entry.messages,
                    format_size(entry.bytes)
                );
            }
        }
    }
    Ok(())
}
