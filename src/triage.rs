// SPDX-License-Identifier: PMPL-1.0-or-later

//! Triage sessions: one output directory, one timestamp, several phases.
//!
//! A session runs any mix of the system, network and memory phases. A phase
//! that fails is logged and recorded in [`TriageReport::errors`]; the other
//! phases still run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::TriageConfig;
use crate::error::{Result, TriageError};
use crate::memory::{MemoryAnalyzer, ProcessInfo, ProcessModules};
use crate::network::{ArpScanResult, NetworkAnalyzer, NetworkInfo};
use crate::report::{persist_report, FILE_TIMESTAMP_FORMAT};
use crate::rules::RuleSet;
use crate::scanner::ForensicsScanner;

/// Which phases a triage run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    System,
    Network,
    Memory,
    All,
}

impl ScanType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "system" => Some(ScanType::System),
            "network" => Some(ScanType::Network),
            "memory" => Some(ScanType::Memory),
            "all" => Some(ScanType::All),
            _ => None,
        }
    }

    /// Whether a run of this type includes `phase`.
    pub fn includes(&self, phase: ScanType) -> bool {
        *self == ScanType::All || *self == phase
    }
}

/// Parameters of one [`TriageSession::run`].
#[derive(Debug, Clone)]
pub struct TriageRequest {
    pub scan_type: ScanType,
    /// CIDR range for the network phase.
    pub target: String,
    /// Directory walked by the system phase.
    pub root: PathBuf,
    pub max_depth: Option<usize>,
    pub timeout: Duration,
    /// Overrides `rules.rules_dir` for this run.
    pub rules_dir: Option<PathBuf>,
}

impl TriageRequest {
    /// Depth used for the system phase unless the caller asks otherwise.
    pub const DEFAULT_MAX_DEPTH: usize = 3;

    pub fn new(scan_type: ScanType, config: &TriageConfig) -> Self {
        Self {
            scan_type,
            target: config.network.default_target.clone(),
            root: PathBuf::from("/"),
            max_depth: Some(Self::DEFAULT_MAX_DEPTH),
            timeout: Duration::from_secs_f64(config.network.timeout_secs),
            rules_dir: None,
        }
    }
}

/// Outcome of a directory scan as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScanSummary {
    Success {
        scanned_directory: PathBuf,
        file_count: usize,
        error_count: usize,
        flagged_count: usize,
        output_file: PathBuf,
    },
    Error {
        error: String,
    },
}

impl ScanSummary {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanSummary::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReport {
    pub arp: ArpScanResult,
    pub info: Option<NetworkInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryReport {
    pub processes: Vec<ProcessInfo>,
    pub modules: Vec<ProcessModules>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: String,
    pub message: String,
}

/// Everything one triage run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    pub timestamp: String,
    pub scan_type: ScanType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<ScanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReport>,
    pub errors: Vec<PhaseError>,
}

impl TriageReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct TriageSession {
    config: TriageConfig,
    output_dir: PathBuf,
    timestamp: String,
    rules: Option<Arc<RuleSet>>,
    proc_root: PathBuf,
}

impl TriageSession {
    /// Create the output directory and fix the session timestamp.
    ///
    /// `output_dir` defaults to `output.base_dir`. Rules from
    /// `rules.rules_dir` are loaded here; a directory that fails to load is
    /// logged and the session runs without rules.
    pub fn new(config: TriageConfig, output_dir: Option<&Path>) -> Result<Self> {
        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config.output.base_dir.clone());
        fs::create_dir_all(&output_dir).map_err(|source| TriageError::DirectoryCreate {
            path: output_dir.clone(),
            source,
        })?;

        let rules = config.rules_dir().and_then(load_rules);
        let timestamp = Local::now().format(FILE_TIMESTAMP_FORMAT).to_string();
        info!(
            "Initialized triage session. Output directory: {}",
            output_dir.display()
        );

        Ok(Self {
            config,
            output_dir,
            timestamp,
            rules,
            proc_root: PathBuf::from("/proc"),
        })
    }

    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Read process and network state from another procfs tree.
    pub fn with_proc_root(mut self, root: impl AsRef<Path>) -> Self {
        self.proc_root = root.as_ref().to_path_buf();
        self
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn rules(&self) -> Option<&Arc<RuleSet>> {
        self.rules.as_ref()
    }

    /// Where this session's log is written.
    pub fn log_file(&self) -> PathBuf {
        self.output_dir
            .join(format!("forensics_triage_{}.log", self.timestamp))
    }

    /// Scan `dir` and save `scan_results_<ts>.json` in the output directory.
    /// Failures come back as [`ScanSummary::Error`].
    pub fn scan_directory(&self, dir: &Path, max_file_size: Option<u64>) -> ScanSummary {
        self.scan_tree(dir, max_file_size, self.config.scanning.max_depth, self.rules.clone())
    }

    fn scan_tree(
        &self,
        dir: &Path,
        max_file_size: Option<u64>,
        max_depth: Option<usize>,
        rules: Option<Arc<RuleSet>>,
    ) -> ScanSummary {
        let outcome = (|| -> Result<ScanSummary> {
            let mut scanner = ForensicsScanner::new(dir, &self.config)?.with_max_depth(max_depth);
            if let Some(limit) = max_file_size {
                scanner = scanner.with_max_file_size(limit);
            }
            if let Some(rules) = rules {
                scanner = scanner.with_rules(rules);
            }

            let files = scanner.scan()?;
            let output_file = self
                .output_dir
                .join(format!("scan_results_{}.json", self.timestamp));
            scanner.save_results(&files, &output_file)?;

            Ok(ScanSummary::Success {
                scanned_directory: dir.to_path_buf(),
                file_count: files.len(),
                error_count: files.iter().filter(|f| f.is_error()).count(),
                flagged_count: files
                    .iter()
                    .filter(|f| f.pattern_matches.as_ref().is_some_and(|m| !m.is_empty()))
                    .count(),
                output_file,
            })
        })();

        outcome.unwrap_or_else(|e| {
            error!("Error during directory scan: {e}");
            ScanSummary::Error {
                error: e.to_string(),
            }
        })
    }

    /// Run every phase `request.scan_type` covers.
    pub fn run(&self, request: &TriageRequest) -> TriageReport {
        let mut report = TriageReport {
            timestamp: self.timestamp.clone(),
            scan_type: request.scan_type,
            system: None,
            network: None,
            memory: None,
            errors: Vec::new(),
        };

        if request.scan_type.includes(ScanType::System) {
            info!("System phase: scanning {}", request.root.display());
            let rules = match &request.rules_dir {
                Some(dir) => load_rules(dir),
                None => self.rules.clone(),
            };
            let summary = self.scan_tree(&request.root, None, request.max_depth, rules);
            if let ScanSummary::Error { error } = &summary {
                report.errors.push(phase_error("system", error));
            }
            report.system = Some(summary);
        }

        if request.scan_type.includes(ScanType::Network) {
            info!("Network phase: target {}", request.target);
            match self.network_phase(request) {
                Ok(network) => report.network = Some(network),
                Err(e) => {
                    error!("Network phase failed: {e}");
                    report.errors.push(phase_error("network", &e));
                }
            }
        }

        if request.scan_type.includes(ScanType::Memory) {
            info!("Memory phase");
            match self.memory_phase() {
                Ok(memory) => report.memory = Some(memory),
                Err(e) => {
                    error!("Memory phase failed: {e}");
                    report.errors.push(phase_error("memory", &e));
                }
            }
        }

        if !report.errors.is_empty() && self.config.monitoring.alert_on_error {
            warn!("Triage finished with {} failed phase(s)", report.errors.len());
        }
        report
    }

    fn network_phase(&self, request: &TriageRequest) -> Result<NetworkReport> {
        let analyzer = NetworkAnalyzer::new(&self.config.network).with_proc_root(&self.proc_root);
        let arp = analyzer.perform_arp_scan(&request.target, request.timeout)?;
        let info = match analyzer.network_info() {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Interface counters unavailable: {e}");
                None
            }
        };
        Ok(NetworkReport { arp, info })
    }

    fn memory_phase(&self) -> Result<MemoryReport> {
        let analyzer = MemoryAnalyzer::new().with_proc_root(&self.proc_root);
        Ok(MemoryReport {
            processes: analyzer.analyze_running_processes()?,
            modules: analyzer.analyze_loaded_modules()?,
        })
    }

    /// Write `triage_results_<ts>.<ext>` in the configured report format.
    pub fn save_results(&self, report: &TriageReport) -> Result<PathBuf> {
        let format = self.config.output.report_format;
        let mut stored = persist_report(
            report,
            &self.output_dir,
            "triage_results",
            &self.timestamp,
            &[format],
        )?;
        stored
            .pop()
            .ok_or_else(|| TriageError::processing("no report file was written"))
    }
}

fn phase_error(phase: &str, error: &impl ToString) -> PhaseError {
    PhaseError {
        phase: phase.to_string(),
        message: error.to_string(),
    }
}

fn load_rules(dir: &Path) -> Option<Arc<RuleSet>> {
    match RuleSet::load_dir(dir) {
        Ok(Some(rules)) => {
            info!("Loaded {} rules from {}", rules.rule_count(), dir.display());
            Some(Arc::new(rules))
        }
        Ok(None) => {
            warn!("No usable rules in {}", dir.display());
            None
        }
        Err(e) => {
            warn!("Cannot load rules from {}: {e}", dir.display());
            None
        }
    }
}
