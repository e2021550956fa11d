//! Verify command implementation.
//!
//! Verification only reads. Problems that loading repairs on its own, such
//! as torn tails or an interrupted compaction, are warnings; problems that
//! make loading fail are errors.

use super::data_files;
use crate::dir::{DataDir, JournalNames};
use crate::error::{CliError, CliResult};
use mqstore_journal::{scan_file, ControlFile, FileId, JournalManifest, ScanEnd, COMPACT_SUFFIX};
use mqstore_paging::{address_dir, decode_entries, list_paged_addresses, page_file_name};
use mqstore_storage::SequentialFileFactory;
use std::collections::HashMap;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Journal files scanned.
    pub files_checked: usize,
    /// Journal records scanned.
    pub records_checked: usize,
    /// Pages scanned.
    pub pages_checked: usize,
    /// Problems that make loading fail.
    pub errors: Vec<String>,
    /// Problems loading repairs.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(dir: &DataDir, names: &JournalNames, check_pages: bool) -> CliResult<()> {
    println!("Verifying {}", dir.path().display());
    println!();

    let result = check(dir, names, check_pages)?;
    println!("Journal files: {}", result.files_checked);
    println!("Records:       {}", result.records_checked);
    if check_pages {
        println!("Pages:         {}", result.pages_checked);
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error:   {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Verification passed");
        Ok(())
    } else {
        println!("✗ Verification failed");
        Err(CliError::VerifyFailed(result.errors.len()))
    }
}

/// Checks the journal and, optionally, every page.
pub fn check(dir: &DataDir, names: &JournalNames, check_pages: bool) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let factory = dir.journal();
    check_journal(factory.as_ref(), names, &mut result)?;
    if check_pages && dir.has_paging() {
        check_pages_under(dir.paging().as_ref(), &mut result)?;
    }
    Ok(result)
}

fn check_journal(factory: &dyn SequentialFileFactory, names: &JournalNames, result: &mut VerifyResult) -> CliResult<()> {
    let config = names.config();
    let mut headed: HashMap<FileId, String> = HashMap::new();

    for name in data_files(factory, names)? {
        result.files_checked += 1;
        let file = factory.create_sequential_file(&name, 1);
        file.open()?;
        let scan = scan_file(file.as_ref());
        let size = file.size();
        file.close()?;

        let Some(scan) = scan? else {
            if size? != config.file_size {
                result
                    .warnings
                    .push(format!("{name}: no header and not pool-sized, deleted on load"));
            }
            continue;
        };
        result.records_checked += scan.records.len();
        if let ScanEnd::Torn(reason) = scan.end {
            result.warnings.push(format!(
                "{name}: torn tail at offset {} ({reason}), truncated on load",
                scan.end_position
            ));
        }
        if let Some(other) = headed.insert(scan.file_id, name.clone()) {
            result
                .errors
                .push(format!("{other} and {name} share {}", scan.file_id));
        }
    }

    let control = ControlFile::read(factory, &config.control_file_name())?;
    match &control {
        Some(Some(control)) => result.warnings.push(format!(
            "interrupted compaction of {} file(s), finished on load",
            control.old_files.len()
        )),
        Some(None) => result
            .warnings
            .push("incomplete compaction control file, discarded on load".to_string()),
        None => {}
    }

    match JournalManifest::load(factory, &config.manifest_name()) {
        Ok(Some(manifest)) => {
            for id in &manifest.file_ids {
                if !headed.contains_key(id) {
                    let message = format!("manifest lists {id}, which no file holds");
                    if matches!(control, Some(Some(_))) {
                        result.warnings.push(message);
                    } else {
                        result.errors.push(message);
                    }
                }
            }
        }
        Ok(None) if headed.is_empty() => {}
        Ok(None) => result.warnings.push("no manifest".to_string()),
        Err(e) => result.errors.push(format!("manifest unreadable: {e}")),
    }

    let prefix = format!("{}-", names.prefix);
    for name in factory.list_files(COMPACT_SUFFIX)? {
        if name.starts_with(&prefix) && !matches!(control, Some(Some(_))) {
            result
                .warnings
                .push(format!("{name}: stray compaction output, deleted on load"));
        }
    }
    Ok(())
}

fn check_pages_under(root: &dyn SequentialFileFactory, result: &mut VerifyResult) -> CliResult<()> {
    for (address, pages) in list_paged_addresses(root)? {
        let store = root.child(&address_dir(&address))?;
        for id in pages {
            result.pages_checked += 1;
            let name = page_file_name(id);
            let file = store.create_sequential_file(&name, 1);
            file.open()?;
            let data = file.read_all();
            file.close()?;
            let (_, end, torn) = decode_entries(&data?);
            if let Some(reason) = torn {
                result.warnings.push(format!(
                    "{address}/{name}: torn entry at offset {end} ({reason}), ignored on depage"
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mqstore_journal::{Journal, JournalConfig};
    use mqstore_storage::NioFileFactory;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn names() -> JournalNames {
        JournalNames {
            prefix: "mq-data".to_string(),
            extension: "mqj".to_string(),
            file_size: 4096,
        }
    }

    fn write_journal(root: &std::path::Path) {
        let config: JournalConfig = names().config().min_files(2);
        let journal = Journal::open(config, Arc::new(NioFileFactory::new(&root.join("journal")))).unwrap();
        journal.load().unwrap();
        for id in 1..=5 {
            journal.append_add_record(id, 1, &[id as u8; 40], true).unwrap();
        }
        journal.stop().unwrap();
    }

    #[test]
    fn clean_journal_passes() {
        let tmp = tempdir().unwrap();
        write_journal(tmp.path());
        let dir = DataDir::read_only(tmp.path()).unwrap();

        let result = check(&dir, &names(), true).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.records_checked, 5);
    }

    #[test]
    fn torn_tail_is_a_warning() {
        let tmp = tempdir().unwrap();
        write_journal(tmp.path());
        let dir = DataDir::read_only(tmp.path()).unwrap();
        let factory = dir.journal();

        let mut damaged = false;
        for name in data_files(factory.as_ref(), &names()).unwrap() {
            let path = tmp.path().join("journal").join(&name);
            let file = factory.create_sequential_file(&name, 1);
            file.open().unwrap();
            let scan = scan_file(file.as_ref()).unwrap();
            file.close().unwrap();
            if let Some(scan) = scan.filter(|s| !s.records.is_empty()) {
                let mut bytes = std::fs::read(&path).unwrap();
                let end = scan.end_position as usize;
                bytes[end..end + 8].copy_from_slice(&[0xAB; 8]);
                std::fs::write(&path, bytes).unwrap();
                damaged = true;
            }
        }
        assert!(damaged);

        let result = check(&dir, &names(), false).unwrap();
        assert!(result.is_ok());
        assert!(result.warnings.iter().any(|w| w.contains("torn tail")));
    }

    #[test]
    fn unreadable_manifest_is_an_error() {
        let tmp = tempdir().unwrap();
        write_journal(tmp.path());
        std::fs::write(tmp.path().join("journal").join("mq-data.manifest"), b"garbage").unwrap();
        let dir = DataDir::read_only(tmp.path()).unwrap();

        let result = check(&dir, &names(), false).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("manifest"));
    }
}
