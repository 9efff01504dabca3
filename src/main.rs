// SPDX-License-Identifier: PMPL-1.0-or-later

//! ftriage: forensic triage of a live host
//!
//! Hashes and pattern-scans a filesystem, discovers hosts on the local
//! network with ARP, and inventories running processes, saving everything
//! as timestamped JSON or YAML reports.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use forensic_triage::config::{self, TriageConfig};
use forensic_triage::logging::{init_logging, Verbosity};
use forensic_triage::memory::MemoryAnalyzer;
use forensic_triage::network::NetworkAnalyzer;
use forensic_triage::report::{
    self, diff_scans, format_diff, latest_reports, ReportFormat, ReportFormatter,
};
use forensic_triage::rules::RuleSet;
use forensic_triage::scanner::ScanResults;
use forensic_triage::triage::{ScanSummary, ScanType, TriageRequest, TriageSession};
use forensic_triage::{diagnostics, spectral};

#[derive(Parser)]
#[command(name = "ftriage")]
#[command(version)]
#[command(about = "Forensic triage: file hashing, pattern rules, ARP discovery and process inventory")]
#[command(long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash and inspect every file under a directory
    Scan {
        /// Directory to scan
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Directory for results and the session log
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Skip hashing files larger than this many bytes
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Directory of .yar rule files
        #[arg(short, long, value_name = "DIR")]
        rules: Option<PathBuf>,
    },

    /// Run the system, network and memory phases and save a combined report
    Triage {
        #[arg(short, long, value_enum, default_value = "all")]
        scan_type: ScanType,

        /// Network range for the network phase (CIDR)
        #[arg(short, long)]
        target: Option<String>,

        /// Directory walked by the system phase
        #[arg(long, default_value = "/")]
        root: PathBuf,

        /// Maximum directory depth for the system phase
        #[arg(long, default_value_t = TriageRequest::DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// ARP reply timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Directory of .yar rule files
        #[arg(short, long, value_name = "DIR")]
        rules: Option<PathBuf>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Discover hosts on a network range
    Network {
        /// CIDR range (defaults to network.default_target)
        #[arg(value_name = "TARGET")]
        target: Option<String>,

        /// ARP reply timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List running processes
    Processes {
        /// Also list mapped files per process
        #[arg(short, long)]
        modules: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Compile or apply pattern rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Compare two saved scan results
    Diff {
        /// Earlier scan results file
        #[arg(value_name = "BASE", required_unless_present = "latest")]
        base: Option<PathBuf>,

        /// Later scan results file
        #[arg(value_name = "COMPARE", required_unless_present = "latest")]
        compare: Option<PathBuf>,

        /// Compare the two newest scan results in this directory
        #[arg(long, value_name = "DIR", conflicts_with_all = ["base", "compare"])]
        latest: Option<PathBuf>,
    },

    /// Check configuration, privileges and host support
    Doctor,

    /// Print the effective configuration as YAML
    Config,

    /// Spectrum of a numeric signal file
    Dft {
        /// Whitespace- or comma-separated samples
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print the full spectrum as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Compile a rule file or directory and report errors
    Check {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Match rules against files or directories
    Match {
        /// Rule file or directory of rule files
        #[arg(short, long, value_name = "PATH")]
        rules: PathBuf,

        #[arg(value_name = "TARGET", required = true)]
        targets: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TriageConfig::load(cli.config.as_deref())
        .context("loading configuration")?;
    let level = Verbosity::from_flags(cli.quiet, cli.verbose).level(&config.logging.level);

    match cli.command {
        Commands::Scan {
            directory,
            output_dir,
            max_file_size,
            rules,
        } => {
            let mut session = TriageSession::new(config, output_dir.as_deref())
                .context("creating output directory")?;
            init_logging(level, Some(&session.log_file()))?;
            if let Some(dir) = rules {
                session = session.with_rules(load_rules(&dir)?);
            }

            let summary = session.scan_directory(&directory, max_file_size);
            match &summary {
                ScanSummary::Success {
                    scanned_directory,
                    file_count,
                    output_file,
                    ..
                } => {
                    println!("\nScan complete!");
                    println!("- Scanned directory: {}", scanned_directory.display());
                    println!("- Files processed: {}", file_count);
                    println!("- Results saved to: {}", output_file.display());
                    println!("- Session log: {}", session.log_file().display());
                }
                ScanSummary::Error { error } => bail!("error during scan: {error}"),
            }
        }

        Commands::Triage {
            scan_type,
            target,
            root,
            max_depth,
            timeout,
            rules,
            output_dir,
        } => {
            let session = TriageSession::new(config, output_dir.as_deref())
                .context("creating output directory")?;
            init_logging(level, Some(&session.log_file()))?;

            let mut request = TriageRequest::new(scan_type, session.config());
            if let Some(target) = target {
                request.target = target;
            }
            if let Some(secs) = timeout {
                request.timeout = timeout_from_secs(secs)?;
            }
            request.root = root;
            request.max_depth = Some(max_depth);
            request.rules_dir = rules;

            let report = session.run(&request);
            report::print_report(&report);
            let saved = session
                .save_results(&report)
                .context("saving triage results")?;
            println!("Results saved to: {}", saved.display());

            if !report.is_clean() {
                bail!("{} triage phase(s) failed", report.errors.len());
            }
        }

        Commands::Network {
            target,
            timeout,
            json,
        } => {
            init_logging(level, None)?;
            let analyzer = NetworkAnalyzer::new(&config.network);
            let target = target.unwrap_or_else(|| config.network.default_target.clone());
            let timeout = match timeout {
                Some(secs) => timeout_from_secs(secs)?,
                None => analyzer.default_timeout(),
            };

            let scan = analyzer
                .perform_arp_scan(&target, timeout)
                .with_context(|| format!("scanning {target}"))?;
            let info = analyzer.network_info().ok();

            if json {
                let doc = serde_json::json!({ "arp": scan, "info": info });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                let formatter = ReportFormatter::new();
                formatter.print_hosts(&scan);
                if let Some(info) = &info {
                    println!();
                    formatter.print_network_info(info);
                }
            }
        }

        Commands::Processes { modules, json } => {
            init_logging(level, None)?;
            let analyzer = MemoryAnalyzer::new();
            let processes = analyzer
                .analyze_running_processes()
                .context("reading process table")?;
            let mapped = if modules {
                Some(analyzer.analyze_loaded_modules()?)
            } else {
                None
            };

            if json {
                let doc = serde_json::json!({ "processes": processes, "modules": mapped });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                let formatter = ReportFormatter::new();
                formatter.print_processes(&processes);
                if let Some(mapped) = &mapped {
                    println!();
                    formatter.print_modules(mapped);
                }
            }
        }

        Commands::Rules { action } => {
            init_logging(level, None)?;
            match action {
                RulesAction::Check { path } => {
                    let rules = load_rules(&path)?;
                    let namespaces: Vec<&str> = rules.namespaces().collect();
                    println!(
                        "{} rules compiled in {} namespace(s): {}",
                        rules.rule_count(),
                        namespaces.len(),
                        namespaces.join(", ")
                    );
                }
                RulesAction::Match { rules, targets } => {
                    let rules = load_rules(&rules)?;
                    let limit = config.rules.max_scan_bytes;
                    let formatter = ReportFormatter::new();
                    for target in &targets {
                        for entry in WalkDir::new(target).follow_links(false) {
                            let entry = entry
                                .with_context(|| format!("walking {}", target.display()))?;
                            if !entry.file_type().is_file() {
                                continue;
                            }
                            let matches = rules
                                .scan_file(entry.path(), limit)
                                .with_context(|| format!("scanning {}", entry.path().display()))?;
                            formatter.print_rule_matches(
                                &entry.path().display().to_string(),
                                &matches,
                            );
                        }
                    }
                }
            }
        }

        Commands::Diff {
            base,
            compare,
            latest,
        } => {
            init_logging(level, None)?;
            let (base, compare) = match (latest, base, compare) {
                (Some(dir), _, _) => {
                    let newest = latest_reports(&dir, "scan_results", 2)?;
                    (newest[0].clone(), newest[1].clone())
                }
                (None, Some(base), Some(compare)) => (base, compare),
                _ => bail!("diff needs BASE and COMPARE or --latest DIR"),
            };
            let base_scan = load_scan(&base)?;
            let compare_scan = load_scan(&compare)?;
            let diff = diff_scans(&base_scan, &compare_scan);
            println!(
                "{}",
                format_diff(
                    &diff,
                    &base.display().to_string(),
                    &compare.display().to_string()
                )
            );
        }

        Commands::Doctor => {
            init_logging(level, None)?;
            diagnostics::run_self_diagnostics(&config)?;
        }

        Commands::Config => {
            print!("{}", config::to_yaml(&config)?);
        }

        Commands::Dft { file, json } => {
            init_logging(level, None)?;
            let signal = spectral::load_signal(&file)
                .with_context(|| format!("reading signal {}", file.display()))?;
            let spectrum = spectral::compute_dft(&signal);
            if json {
                println!("{}", ReportFormat::Json.serialize(&spectrum)?);
            } else {
                println!("Samples: {}", signal.len());
                match spectrum.dominant_bin() {
                    Some((bin, magnitude)) => {
                        println!("Dominant bin: {} (magnitude {:.6})", bin, magnitude)
                    }
                    None => println!("Signal too short for a dominant bin"),
                }
                if let Some(dc) = spectrum.magnitudes.first() {
                    println!("DC component: {:.6}", dc);
                }
            }
        }
    }

    Ok(())
}

/// Load a single rule file or a directory of them.
fn load_rules(path: &Path) -> Result<Arc<RuleSet>> {
    if path.is_file() {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading rule file {}", path.display()))?;
        let namespace = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "default".to_string());
        let rules = RuleSet::compile_source(&namespace, &source)
            .with_context(|| format!("compiling {}", path.display()))?;
        return Ok(Arc::new(rules));
    }
    RuleSet::load_dir(path)?
        .map(Arc::new)
        .ok_or_else(|| anyhow!("no compilable rule files in {}", path.display()))
}

fn load_scan(path: &Path) -> Result<ScanResults> {
    ScanResults::load(path).with_context(|| format!("reading scan results {}", path.display()))
}

fn timeout_from_secs(secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        bail!("timeout must be a positive number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}
