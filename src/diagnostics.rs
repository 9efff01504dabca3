// SPDX-License-Identifier: PMPL-1.0-or-later

//! `ftriage doctor`: check that the host and configuration can support a
//! triage run before one is attempted.

use std::fs;
use std::path::{Path, PathBuf};

use colored::*;

use crate::config::TriageConfig;
use crate::error::{Result, TriageError};
use crate::network::{interface, socket};
use crate::rules::RuleSet;

pub fn run_self_diagnostics(config: &TriageConfig) -> Result<()> {
    println!("forensic-triage self-diagnostics");

    let checks = collect_diagnostics(config, Path::new("/proc"));

    println!();
    for entry in &checks {
        entry.print();
    }

    if checks.iter().any(|entry| entry.level == Level::Error) {
        Err(TriageError::validation("self-diagnostics reported issues"))
    } else {
        Ok(())
    }
}

/// Run every check without printing.
pub fn collect_diagnostics(config: &TriageConfig, proc_root: &Path) -> Vec<Diagnostic> {
    vec![
        Diagnostic::ok(
            "version",
            format!("forensic-triage {}", env!("CARGO_PKG_VERSION")),
        ),
        check_config(config),
        check_output_dir(&config.output.base_dir),
        check_rules(config.rules_dir()),
        check_procfs(proc_root),
        check_raw_socket(),
        check_interfaces(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Ok,
    Warn,
    Error,
}

impl Level {
    fn tag(&self) -> ColoredString {
        match self {
            Level::Ok => "  OK".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => " ERR".red().bold(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub label: &'static str,
    pub level: Level,
    pub detail: String,
}

impl Diagnostic {
    fn new(label: &'static str, level: Level, detail: String) -> Self {
        Self {
            label,
            level,
            detail,
        }
    }

    fn ok(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Ok, detail)
    }

    fn warning(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Warn, detail)
    }

    fn error(label: &'static str, detail: String) -> Self {
        Self::new(label, Level::Error, detail)
    }

    fn print(&self) {
        println!("  [{}] {:20} {}", self.level.tag(), self.label, self.detail);
    }
}

fn check_config(config: &TriageConfig) -> Diagnostic {
    match config.validate() {
        Ok(()) => Diagnostic::ok(
            "configuration",
            format!(
                "valid ({} workers, {} hashing)",
                config.scanning.parallel_workers,
                config.scanning.hash_algorithm.name()
            ),
        ),
        Err(e) => Diagnostic::error("configuration", e.to_string()),
    }
}

fn check_output_dir(path: &Path) -> Diagnostic {
    const LABEL: &str = "output directory";
    if path.exists() && !path.is_dir() {
        return Diagnostic::error(
            LABEL,
            format!("{} exists but is not a directory", path.display()),
        );
    }
    let existed = path.exists();
    if let Err(e) = fs::create_dir_all(path) {
        return Diagnostic::error(LABEL, format!("cannot create {}: {e}", path.display()));
    }

    let probe: PathBuf = path.join(".ftriage-write-probe");
    let writable = fs::write(&probe, b"probe").and_then(|_| fs::remove_file(&probe));
    match writable {
        Ok(()) if existed => Diagnostic::ok(LABEL, format!("{} is writable", path.display())),
        Ok(()) => Diagnostic::ok(LABEL, format!("{} created", path.display())),
        Err(e) => Diagnostic::error(LABEL, format!("{} is not writable: {e}", path.display())),
    }
}

fn check_rules(dir: Option<&Path>) -> Diagnostic {
    const LABEL: &str = "pattern rules";
    let Some(dir) = dir else {
        return Diagnostic::warning(
            LABEL,
            "not configured (set rules.rules_dir or DFT_RULES_RULES_DIR)".to_string(),
        );
    };
    match RuleSet::load_dir(dir) {
        Ok(Some(rules)) => Diagnostic::ok(
            LABEL,
            format!(
                "{} rules in {} namespaces from {}",
                rules.rule_count(),
                rules.namespaces().count(),
                dir.display()
            ),
        ),
        Ok(None) => Diagnostic::warning(
            LABEL,
            format!("no compilable .yar files in {}", dir.display()),
        ),
        Err(e) => Diagnostic::error(LABEL, e.to_string()),
    }
}

fn check_procfs(proc_root: &Path) -> Diagnostic {
    if proc_root.join("self").join("stat").is_file() {
        Diagnostic::ok("procfs", format!("{} mounted", proc_root.display()))
    } else {
        Diagnostic::warning(
            "procfs",
            format!(
                "{} unavailable (memory and network counters disabled)",
                proc_root.display()
            ),
        )
    }
}

fn check_raw_socket() -> Diagnostic {
    if socket::has_raw_socket_privilege() {
        Diagnostic::ok("raw sockets", "active ARP scanning available".to_string())
    } else {
        Diagnostic::warning(
            "raw sockets",
            "no CAP_NET_RAW; ARP scans run in limited mode".to_string(),
        )
    }
}

fn check_interfaces() -> Diagnostic {
    match interface::list_interfaces() {
        Ok(list) => {
            let usable: Vec<&str> = list
                .iter()
                .filter(|i| !i.is_loopback())
                .map(|i| i.name.as_str())
                .collect();
            if usable.is_empty() {
                Diagnostic::warning("interfaces", "no non-loopback IPv4 interface".to_string())
            } else {
                Diagnostic::ok("interfaces", usable.join(", "))
            }
        }
        Err(e) => Diagnostic::warning("interfaces", e.to_string()),
    }
}
