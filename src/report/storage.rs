// SPDX-License-Identifier: PMPL-1.0-or-later

//! Timestamped report files on disk

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::ReportFormat;
use crate::error::{Result, TriageError};

/// Timestamp used in report and log file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Write `report` once per format as `<directory>/<prefix>_<timestamp>.<ext>`.
pub fn persist_report<T: Serialize>(
    report: &T,
    directory: &Path,
    prefix: &str,
    timestamp: &str,
    formats: &[ReportFormat],
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(directory).map_err(|source| TriageError::DirectoryCreate {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut stored = Vec::with_capacity(formats.len());
    for format in formats {
        let path = directory.join(format!("{prefix}_{timestamp}.{}", format.extension()));
        fs::write(&path, format.serialize(report)?)?;
        info!("Report written to {}", path.display());
        stored.push(path);
    }
    Ok(stored)
}

/// The `count` newest reports named `<prefix>_*` in `dir`, oldest first.
///
/// Names embed a sortable timestamp, so name order is age order.
pub fn latest_reports(dir: &Path, prefix: &str, count: usize) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(TriageError::file_system(format!(
            "report directory not found: {}",
            dir.display()
        )));
    }

    let wanted = format!("{prefix}_");
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let named = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&wanted))
                .unwrap_or(false);
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(ReportFormat::parse)
                .is_some();
            named && known
        })
        .collect();

    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if entries.len() < count {
        return Err(TriageError::validation(format!(
            "not enough reports in {} (need {}, found {})",
            dir.display(),
            count,
            entries.len()
        )));
    }
    let start = entries.len() - count;
    Ok(entries[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persist_both_formats() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/out");
        let paths = persist_report(
            &serde_json::json!({"ok": true}),
            &out,
            "scan",
            "20240101_120000",
            &[ReportFormat::Json, ReportFormat::Yaml],
        )
        .unwrap();
        assert_eq!(paths.len(), 2);
        assert!(out.join("scan_20240101_120000.json").is_file());
        assert!(out.join("scan_20240101_120000.yaml").is_file());
    }

    #[test]
    fn test_latest_reports_orders_by_name() {
        let dir = TempDir::new().unwrap();
        for name in [
            "scan_20240103_000000.json",
            "scan_20240101_000000.json",
            "scan_20240102_000000.yaml",
            "other_20250101_000000.json",
            "scan_notes.txt",
        ] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        let latest = latest_reports(dir.path(), "scan", 2).unwrap();
        let names: Vec<_> = latest
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["scan_20240102_000000.yaml", "scan_20240103_000000.json"]
        );
    }

    #[test]
    fn test_latest_reports_needs_enough_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("scan_20240101_000000.json"), "{}").unwrap();
        assert!(latest_reports(dir.path(), "scan", 2).is_err());
        assert!(latest_reports(&dir.path().join("missing"), "scan", 1).is_err());
    }
}
