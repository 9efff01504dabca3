// SPDX-License-Identifier: PMPL-1.0-or-later

//! Directory scanning: file metadata, digests and pattern-rule hits.
//!
//! Files are enumerated sequentially (the validator is stateful) and then
//! processed on a dedicated rayon pool sized by `scanning.parallel_workers`.

pub mod hash;
pub mod validator;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::TriageConfig;
use crate::error::{Result, TriageError};
use crate::rules::RuleSet;

pub use hash::HashAlgorithm;
pub use validator::PathValidator;

/// Metadata collected for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub accessed: Option<String>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub is_executable: bool,
    /// `namespace:rule` for every matching rule; absent when no rules ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_matches: Option<Vec<String>>,
    /// Only the first `rules.max_scan_bytes` bytes were pattern-matched.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub patterns_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

/// Everything a worker needs to turn a path into a [`FileRecord`].
struct RecordContext<'a> {
    algorithm: HashAlgorithm,
    min_file_size: u64,
    max_file_size: u64,
    rules: Option<&'a RuleSet>,
    max_scan_bytes: u64,
}

impl FileRecord {
    /// Record for a file that could not be processed.
    pub fn failed(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            size: None,
            created: None,
            modified: None,
            accessed: None,
            file_hash: None,
            is_executable: false,
            pattern_matches: None,
            patterns_truncated: false,
            error: Some(message.into()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn collect(path: &Path, ctx: &RecordContext<'_>) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| {
            TriageError::file_system(format!(
                "could not collect metadata for {}: {e}",
                path.display()
            ))
        })?;
        let size = meta.len();

        let file_hash = if size < ctx.min_file_size {
            None
        } else if size > ctx.max_file_size {
            info!("Skipping hash for large file: {}", path.display());
            None
        } else {
            let digest = ctx.algorithm.hash_file(path).map_err(|e| {
                TriageError::processing(format!(
                    "could not calculate hash for {}: {e}",
                    path.display()
                ))
            })?;
            Some(digest)
        };

        let patterns_truncated = ctx.rules.is_some() && size > ctx.max_scan_bytes;
        if patterns_truncated {
            debug!(
                "Matching rules against the first {} bytes of {}",
                ctx.max_scan_bytes,
                path.display()
            );
        }
        let pattern_matches = ctx.rules.map(|rules| match rules.scan_file(path, ctx.max_scan_bytes) {
            Ok(matches) => matches.iter().map(|m| m.qualified_name()).collect(),
            Err(e) => {
                warn!("Pattern scanning error for {}: {e}", path.display());
                Vec::new()
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            size: Some(size),
            created: FileTime::from_creation_time(&meta).and_then(format_file_time),
            modified: format_file_time(FileTime::from_last_modification_time(&meta)),
            accessed: format_file_time(FileTime::from_last_access_time(&meta)),
            file_hash,
            is_executable: is_executable(&meta),
            pattern_matches,
            patterns_truncated,
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

fn format_file_time(time: FileTime) -> Option<String> {
    DateTime::<Utc>::from_timestamp(time.unix_seconds(), time.nanoseconds())
        .map(|dt| dt.to_rfc3339())
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &fs::Metadata) -> bool {
    let _ = meta;
    false
}

/// Scanner configuration captured in saved results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub max_file_size: u64,
    pub min_file_size: u64,
    pub hash_algorithm: HashAlgorithm,
    pub parallel_workers: usize,
}

/// The document written by [`ForensicsScanner::save_results`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    pub scan_timestamp: String,
    pub scanned_directory: PathBuf,
    pub file_count: usize,
    pub configuration: ScanSettings,
    pub files: Vec<FileRecord>,
}

impl ScanResults {
    /// Load a saved document; `.yaml`/`.yml` files are read as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        crate::report::load_report(path)
    }

    pub fn error_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_error()).count()
    }

    pub fn flagged(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| {
            f.pattern_matches
                .as_ref()
                .map(|m| !m.is_empty())
                .unwrap_or(false)
        })
    }
}

/// Scanner for collecting forensic metadata from files under one directory.
pub struct ForensicsScanner {
    directory: PathBuf,
    config: TriageConfig,
    rules: Option<Arc<RuleSet>>,
    scan_timeout: Option<Duration>,
}

impl ForensicsScanner {
    pub fn new(directory: impl AsRef<Path>, config: &TriageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(TriageError::validation(format!(
                "directory does not exist: {}",
                directory.display()
            )));
        }
        info!("Initialized ForensicsScanner for directory: {}", directory.display());
        let timeout_secs = config.monitoring.scan_timeout_secs;
        Ok(Self {
            directory,
            config: config.clone(),
            rules: None,
            scan_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }

    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.config.scanning.max_depth = depth;
        self
    }

    /// Overall time budget for [`scan`](Self::scan); `None` disables it.
    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.config.scanning.max_file_size = max_file_size;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    /// Enumerate files that pass the validator, in walk order.
    pub fn file_list(&self) -> Result<Vec<PathBuf>> {
        let mut validator =
            PathValidator::new(&self.directory, &self.config.scanning, &self.config.security)?;

        let mut walker = WalkDir::new(&self.directory)
            .follow_links(false)
            .sort_by_file_name();
        if let Some(depth) = self.config.scanning.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cannot walk entry: {e}");
                    continue;
                }
            };
            let file_type = entry.file_type();
            let is_candidate = file_type.is_file()
                || (file_type.is_symlink()
                    && fs::metadata(entry.path()).map(|m| m.is_file()).unwrap_or(false));
            if !is_candidate {
                continue;
            }

            match validator.is_valid_path(entry.path()) {
                Ok(true) => files.push(entry.into_path()),
                Ok(false) => debug!("Filtered {}", entry.path().display()),
                Err(e) => warn!("{e}"),
            }
        }

        Ok(files)
    }

    /// Scan the directory and collect one record per accepted file.
    pub fn scan(&self) -> Result<Vec<FileRecord>> {
        info!("Starting scan of {}", self.directory.display());

        let files = self.file_list()?;
        info!("Found {} files to process", files.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.scanning.parallel_workers)
            .thread_name(|i| format!("triage-scan-{i}"))
            .build()
            .map_err(|e| TriageError::Concurrency(e.to_string()))?;

        let ctx = RecordContext {
            algorithm: self.config.scanning.hash_algorithm,
            min_file_size: self.config.scanning.min_file_size,
            max_file_size: self.config.scanning.max_file_size,
            rules: self.rules.as_deref(),
            max_scan_bytes: self.config.rules.max_scan_bytes,
        };
        let monitoring = &self.config.monitoring;
        let deadline = self.scan_timeout.map(|timeout| Instant::now() + timeout);
        let timed_out = AtomicBool::new(false);

        let mut results: Vec<FileRecord> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        timed_out.store(true, Ordering::Relaxed);
                        return FileRecord::failed(path, "scan timeout exceeded");
                    }
                    match FileRecord::collect(path, &ctx) {
                        Ok(record) => record,
                        Err(e) => {
                            if monitoring.alert_on_error {
                                error!("Error processing {}: {e}", path.display());
                            } else {
                                debug!("Error processing {}: {e}", path.display());
                            }
                            FileRecord::failed(path, e.to_string())
                        }
                    }
                })
                .collect()
        });

        if timed_out.load(Ordering::Relaxed) && monitoring.alert_on_timeout {
            warn!(
                "Scan of {} exceeded {:?}; remaining files were not processed",
                self.directory.display(),
                self.scan_timeout.unwrap_or_default()
            );
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Scan complete. Processed {} files", results.len());
        Ok(results)
    }

    /// Wrap records in the saved-results document.
    pub fn results(&self, files: Vec<FileRecord>) -> ScanResults {
        let scanning = &self.config.scanning;
        ScanResults {
            scan_timestamp: Utc::now().to_rfc3339(),
            scanned_directory: self.directory.clone(),
            file_count: files.len(),
            configuration: ScanSettings {
                max_file_size: scanning.max_file_size,
                min_file_size: scanning.min_file_size,
                hash_algorithm: scanning.hash_algorithm,
                parallel_workers: scanning.parallel_workers,
            },
            files,
        }
    }

    /// Save scan results as pretty JSON, creating parent directories.
    pub fn save_results(&self, files: &[FileRecord], output_file: &Path) -> Result<()> {
        if let Some(parent) = output_file.parent() {
            fs::create_dir_all(parent).map_err(|source| TriageError::DirectoryCreate {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let document = self.results(files.to_vec());
        fs::write(output_file, serde_json::to_string_pretty(&document)?)?;
        info!("Results saved to {}", output_file.display());
        Ok(())
    }
}
