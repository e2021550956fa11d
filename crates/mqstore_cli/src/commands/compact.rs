//! Compact command implementation.

use super::{format_size, load_journal};
use crate::dir::{DataDir, JournalNames};
use crate::error::CliResult;
use mqstore_journal::JournalError;

/// Runs the compact command.
pub fn run(dir: &DataDir, names: &JournalNames, force: bool, dry_run: bool) -> CliResult<()> {
    println!("Compacting journal at {}", dir.path().display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let (journal, _) = load_journal(dir, names)?;
    let before = journal.stats();
    println!("Before:");
    println!("  Data files: {}", before.data_files);
    println!("  Live bytes: {}", format_size(before.live_bytes.max(0) as u64));

    let wanted = journal.needs_compaction();
    println!("  Needs compaction: {wanted}");
    if dry_run || !(wanted || force) {
        if !dry_run {
            println!();
            println!("No compaction needed (use --force to compact anyway)");
        }
        journal.stop()?;
        return Ok(());
    }

    let outcome = journal.compact();
    let reclaimed = journal.reclaim();
    journal.stop()?;
    match outcome {
        Ok(result) if result.compacted_files == 0 => {
            println!();
            println!("Nothing to compact");
            Ok(())
        }
        Ok(result) => {
            println!();
            println!("Compacted {} file(s) into {}", result.compacted_files, result.output_files);
            println!(
                "  Records copied: {} ({})",
                result.records_copied,
                format_size(result.bytes_copied)
            );
            println!("  Files reclaimed: {}", reclaimed?);
            println!("✓ Compaction complete");
            Ok(())
        }
        Err(JournalError::InvalidState { message }) => {
            println!();
            println!("Nothing compacted: {message}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
