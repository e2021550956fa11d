//! Dead-file detection.
//!
//! A file can go once every positive it holds is matched by negatives from
//! itself or newer files, and every older file it negates can go as well.
//! The second rule keeps a tombstone alive for as long as the entry it
//! kills is still on disk.

use crate::file::JournalFile;
use std::sync::Arc;

/// Marks reclaimable files in `files`, ordered oldest first with the current
/// file last, and returns the reclaimable ones. The last file is never
/// returned.
pub(crate) fn scan(files: &[Arc<JournalFile>]) -> Vec<Arc<JournalFile>> {
    for (i, file) in files.iter().enumerate() {
        let pos = file.pos_count();
        let mut reclaimable = if pos == 0 {
            true
        } else {
            let negated: u64 = files[i..]
                .iter()
                .map(|later| u64::from(later.neg_count(file.id())))
                .sum();
            u64::from(pos) <= negated
        };

        if reclaimable {
            reclaimable = !files[..i]
                .iter()
                .any(|older| !older.can_reclaim() && file.neg_count(older.id()) > 0);
        }

        file.set_can_reclaim(reclaimable);
    }

    let Some((_, data)) = files.split_last() else {
        return Vec::new();
    };
    data.iter().filter(|f| f.can_reclaim()).cloned().collect()
}
