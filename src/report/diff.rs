// SPDX-License-Identifier: PMPL-1.0-or-later

//! Diff two saved scans of the same tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::scanner::{FileRecord, ScanResults};

/// A file present in both scans whose content or metadata changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub base_hash: Option<String>,
    pub compare_hash: Option<String>,
    pub base_size: Option<u64>,
    pub compare_size: Option<u64>,
    /// Rules that started matching in the compare scan.
    pub new_matches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<FileChange>,
    pub unchanged: usize,
}

impl ScanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Paths are compared relative to each scan's root, so scans of a moved or
/// remounted tree still line up. Error records count as present but are
/// never reported as modified.
pub fn diff_scans(base: &ScanResults, compare: &ScanResults) -> ScanDiff {
    let base_files = index(base);
    let compare_files = index(compare);
    let mut diff = ScanDiff::default();

    for (path, record) in &compare_files {
        match base_files.get(path) {
            None => diff.added.push(path.clone()),
            Some(old) if record.is_error() || old.is_error() => diff.unchanged += 1,
            Some(old) if changed(old, record) => diff.modified.push(FileChange {
                path: path.clone(),
                base_hash: old.file_hash.clone(),
                compare_hash: record.file_hash.clone(),
                base_size: old.size,
                compare_size: record.size,
                new_matches: new_matches(old, record),
            }),
            Some(_) => diff.unchanged += 1,
        }
    }
    diff.removed = base_files
        .keys()
        .filter(|path| !compare_files.contains_key(*path))
        .cloned()
        .collect();
    diff
}

fn index(results: &ScanResults) -> BTreeMap<PathBuf, &FileRecord> {
    results
        .files
        .iter()
        .map(|record| (relative(&record.path, &results.scanned_directory), record))
        .collect()
}

fn relative(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn changed(old: &FileRecord, new: &FileRecord) -> bool {
    match (&old.file_hash, &new.file_hash) {
        (Some(a), Some(b)) => a != b,
        // Unhashed on at least one side: fall back to size and mtime.
        _ => old.size != new.size || old.modified != new.modified,
    }
}

fn new_matches(old: &FileRecord, new: &FileRecord) -> Vec<String> {
    let before = old.pattern_matches.as_deref().unwrap_or(&[]);
    new.pattern_matches
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter(|m| !before.contains(m))
        .cloned()
        .collect()
}

pub fn format_diff(diff: &ScanDiff, base_label: &str, compare_label: &str) -> String {
    let mut lines = Vec::new();
    lines.push("=== FORENSIC SCAN DIFF ===".to_string());
    lines.push(format!("Base: {}", base_label));
    lines.push(format!("Compare: {}", compare_label));
    lines.push(String::new());
    lines.push(format!(
        "Added: {}  Removed: {}  Modified: {}  Unchanged: {}",
        diff.added.len(),
        diff.removed.len(),
        diff.modified.len(),
        diff.unchanged
    ));

    if !diff.added.is_empty() {
        lines.push(String::new());
        lines.push("Added files:".to_string());
        lines.extend(diff.added.iter().map(|p| format!("  + {}", p.display())));
    }
    if !diff.removed.is_empty() {
        lines.push(String::new());
        lines.push("Removed files:".to_string());
        lines.extend(diff.removed.iter().map(|p| format!("  - {}", p.display())));
    }
    if !diff.modified.is_empty() {
        lines.push(String::new());
        lines.push("Modified files:".to_string());
        for change in &diff.modified {
            lines.push(format!(
                "  ~ {} ({} -> {} bytes)",
                change.path.display(),
                fmt_size(change.base_size),
                fmt_size(change.compare_size)
            ));
            if let (Some(a), Some(b)) = (&change.base_hash, &change.compare_hash) {
                lines.push(format!("      {} -> {}", short(a), short(b)));
            }
            if !change.new_matches.is_empty() {
                lines.push(format!("      new matches: {}", change.new_matches.join(", ")));
            }
        }
    }

    lines.join("\n")
}

fn fmt_size(size: Option<u64>) -> String {
    size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
