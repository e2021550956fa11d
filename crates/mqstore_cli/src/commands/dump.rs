//! Dump command implementation.

use super::{data_files, Format};
use crate::dir::{DataDir, JournalNames};
use crate::error::CliResult;
use mqstore_journal::{scan_file, JournalRecord, ScanEnd};
use serde::Serialize;

/// One dumped record.
#[derive(Debug, Serialize)]
pub struct DumpRecord {
    /// File name.
    pub file: String,
    /// Offset in the file.
    pub offset: u64,
    /// Encoded size.
    pub size: u32,
    /// Record kind.
    pub kind: String,
    /// Transaction ID, for transactional kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<u64>,
    /// Record ID, for record kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
    /// Caller-defined type, for adds and updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<u8>,
    /// Body length, for kinds with a body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_len: Option<usize>,
    /// Record count, for prepare and commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u32>,
}

impl DumpRecord {
    fn new(file: &str, offset: u64, size: u32, record: &JournalRecord) -> Self {
        let (user_type, body_len, record_count) = match record {
            JournalRecord::Add { user_type, body, .. }
            | JournalRecord::Update { user_type, body, .. }
            | JournalRecord::AddTx { user_type, body, .. }
            | JournalRecord::UpdateTx { user_type, body, .. } => (Some(*user_type), Some(body.len()), None),
            JournalRecord::DeleteTx { body, .. } => (None, Some(body.len()), None),
            JournalRecord::Prepare { record_count, extra, .. } => (None, Some(extra.len()), Some(*record_count)),
            JournalRecord::Commit { record_count, .. } => (None, None, Some(*record_count)),
            JournalRecord::Delete { .. } | JournalRecord::Rollback { .. } => (None, None, None),
        };
        Self {
            file: file.to_string(),
            offset,
            size,
            kind: format!("{:?}", record.kind()),
            tx_id: record.tx_id(),
            record_id: record.record_id(),
            user_type,
            body_len,
            record_count,
        }
    }
}

/// Runs the dump command. Reads only; torn tails are reported, not cut.
pub fn run(
    dir: &DataDir,
    names: &JournalNames,
    only_file: Option<&str>,
    limit: Option<usize>,
    format: Format,
) -> CliResult<()> {
    let factory = dir.journal();
    let limit = limit.unwrap_or(usize::MAX);
    let mut dumped = Vec::new();

    'files: for name in data_files(factory.as_ref(), names)? {
        if only_file.is_some_and(|only| only != name) {
            continue;
        }
        let file = factory.create_sequential_file(&name, 1);
        file.open()?;
        let scan = scan_file(file.as_ref());
        file.close()?;
        let Some(scan) = scan? else {
            continue;
        };

        if format == Format::Text {
            println!("== {name} ({}, {} records)", scan.file_id, scan.records.len());
        }
        for scanned in &scan.records {
            if dumped.len() >= limit {
                break 'files;
            }
            let record = DumpRecord::new(&name, scanned.offset, scanned.size, &scanned.record);
            if format == Format::Text {
                print_text_record(&record);
            }
            dumped.push(record);
        }
        if let (Format::Text, ScanEnd::Torn(reason)) = (format, scan.end) {
            println!("   torn tail at {}: {reason}", scan.end_position);
        }
    }

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&dumped)?);
    }
    Ok(())
}

fn print_text_record(record: &DumpRecord) {
    let mut line = format!("{:>8} {:<9}", record.offset, record.kind);
    if let Some(tx_id) = record.tx_id {
        line.push_str(&format!(" tx={tx_id}"));
    }
    if let Some(id) = record.record_id {
        line.push_str(&format!(" id={id}"));
    }
    if let Some(user_type) = record.user_type {
        line.push_str(&format!(" type={user_type:#04x}"));
    }
    if let Some(len) = record.body_len {
        line.push_str(&format!(" body={len}B"));
    }
    if let Some(count) = record.record_count {
        line.push_str(&format!(" records={count}"));
    }
    println!("{line}");
}
