//! Directory listing helpers: filtering and multi-key sorting.

use std::cmp::Ordering;

use crate::types::{DirFilter, FileInfo, SortKey, SortRule};

/// Compare two entries under a single key.
fn compare_key(key: SortKey, a: &FileInfo, b: &FileInfo) -> Ordering {
    match key {
        // `true` sorts after `false`, so compare b against a
        SortKey::DirectoriesFirst => b.kind.is_dir().cmp(&a.kind.is_dir()),
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::NameIgnoreCase => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Modified => a.modified.cmp(&b.modified),
    }
}

/// Stable sort by `rules`, first rule most significant.
pub fn sort_entries(entries: &mut [FileInfo], rules: &[SortRule]) {
    if rules.is_empty() {
        return;
    }
    entries.sort_by(|a, b| {
        for rule in rules {
            let mut ord = compare_key(rule.key, a, b);
            if rule.descending {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Keep only entries the filter accepts.
pub fn filter_entries(entries: Vec<FileInfo>, filter: Option<&DirFilter>) -> Vec<FileInfo> {
    match filter {
        Some(f) => entries.into_iter().filter(|e| f.accepts(e)).collect(),
        None => entries,
    }
}
