//! Inspect command implementation.

use super::{format_size, load_journal, Format};
use crate::dir::{DataDir, JournalNames};
use crate::error::CliResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory.
    pub path: String,
    /// Files holding records.
    pub data_files: usize,
    /// Pooled empty files.
    pub free_files: usize,
    /// Live records.
    pub live_records: usize,
    /// Bytes of live records.
    pub live_bytes: i64,
    /// Prepared transactions awaiting resolution.
    pub prepared_transactions: usize,
    /// Torn tails truncated while loading.
    pub torn_tails: usize,
    /// Unfinished transactions discarded while loading.
    pub discarded_transactions: usize,
    /// Whether loading finished an interrupted compaction.
    pub compaction_recovered: bool,
    /// Whether the journal qualifies for compaction.
    pub needs_compaction: bool,
    /// Live records per user type.
    pub records_by_type: BTreeMap<u8, usize>,
    /// Per-file details, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileReport>>,
}

/// One journal file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// File name.
    pub name: String,
    /// Header ID.
    pub file_id: u64,
    /// Bytes of live records.
    pub live_bytes: i64,
    /// Records appended to the file.
    pub records: u32,
    /// Whether the file is being appended to.
    pub current: bool,
    /// Whether the file could be reclaimed now.
    pub reclaimable: bool,
}

/// Runs the inspect command.
pub fn run(dir: &DataDir, names: &JournalNames, show_files: bool, format: Format) -> CliResult<()> {
    let (journal, loaded) = load_journal(dir, names)?;
    let stats = journal.stats();

    let mut records_by_type = BTreeMap::new();
    for record in &loaded.records {
        *records_by_type.entry(record.user_type).or_insert(0) += 1;
    }
    let files = show_files.then(|| {
        journal
            .file_stats()
            .into_iter()
            .map(|file| FileReport {
                name: file.name,
                file_id: file.id.as_u64(),
                live_bytes: file.live_bytes,
                records: file.pos_count,
                current: file.is_current,
                reclaimable: file.can_reclaim,
            })
            .collect()
    });

    let result = InspectResult {
        path: dir.path().display().to_string(),
        data_files: stats.data_files,
        free_files: stats.free_files,
        live_records: stats.live_records,
        live_bytes: stats.live_bytes,
        prepared_transactions: loaded.prepared.len(),
        torn_tails: loaded.stats.torn_tails,
        discarded_transactions: loaded.stats.discarded_transactions,
        compaction_recovered: loaded.stats.compaction_recovered,
        needs_compaction: journal.needs_compaction(),
        records_by_type,
        files,
    };
    journal.stop()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("mqstore Journal Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Files:");
    println!("  Data files: {}", result.data_files);
    println!("  Free files: {}", result.free_files);
    println!();
    println!("Records:");
    println!("  Live records: {}", result.live_records);
    println!("  Live bytes:   {}", format_size(result.live_bytes.max(0) as u64));
    println!("  Prepared:     {}", result.prepared_transactions);
    for (user_type, count) in &result.records_by_type {
        println!("  type {user_type:#04x}:    {count}");
    }
    println!();
    println!("Recovery:");
    println!("  Torn tails:             {}", result.torn_tails);
    println!("  Discarded transactions: {}", result.discarded_transactions);
    println!("  Compaction finished:    {}", result.compaction_recovered);
    println!("  Needs compaction:       {}", result.needs_compaction);

    if let Some(files) = &result.files {
        println!();
        println!("Journal files:");
        for file in files {
            println!(
                "  {} (id {}) {} live, {} records{}{}",
                file.name,
                file.file_id,
                format_size(file.live_bytes.max(0) as u64),
                file.records,
                if file.current { ", current" } else { "" },
                if file.reclaimable { ", reclaimable" } else { "" },
            );
        }
    }
}
