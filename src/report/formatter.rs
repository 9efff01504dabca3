// SPDX-License-Identifier: PMPL-1.0-or-later

//! Console rendering of triage results

use colored::*;

use crate::memory::{ProcessInfo, ProcessModules};
use crate::network::{ArpScanResult, NetworkInfo, ScanMode};
use crate::rules::RuleMatch;
use crate::triage::{MemoryReport, NetworkReport, ScanSummary, TriageReport};

/// Processes listed before the table is cut short.
const PROCESS_ROWS: usize = 25;

pub struct ReportFormatter;

impl ReportFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn print(&self, report: &TriageReport) {
        println!("\n{}", "=== FORENSIC TRIAGE REPORT ===".bold().cyan());
        println!("  Session: {}", report.timestamp);
        println!("  Scan type: {:?}", report.scan_type);
        println!();

        if let Some(summary) = &report.system {
            self.print_scan_summary(summary);
            println!();
        }
        if let Some(network) = &report.network {
            self.print_network(network);
            println!();
        }
        if let Some(memory) = &report.memory {
            self.print_memory(memory);
            println!();
        }
        self.print_errors(report);
    }

    pub fn print_scan_summary(&self, summary: &ScanSummary) {
        println!("{}", "FILESYSTEM SCAN".bold().yellow());
        match summary {
            ScanSummary::Success {
                scanned_directory,
                file_count,
                error_count,
                flagged_count,
                output_file,
            } => {
                println!("  Scanned directory: {}", scanned_directory.display());
                println!("  Files processed: {}", file_count);
                if *error_count > 0 {
                    println!("  Unreadable files: {}", error_count.to_string().yellow());
                }
                if *flagged_count > 0 {
                    println!(
                        "  Files matching rules: {}",
                        flagged_count.to_string().red().bold()
                    );
                }
                println!("  Results saved to: {}", output_file.display());
            }
            ScanSummary::Error { error } => {
                println!("  {} {}", "Scan failed:".red().bold(), error);
            }
        }
    }

    fn print_network(&self, network: &NetworkReport) {
        self.print_hosts(&network.arp);
        if let Some(info) = &network.info {
            println!();
            self.print_network_info(info);
        }
    }

    pub fn print_hosts(&self, scan: &ArpScanResult) {
        println!("{}", "NETWORK HOSTS".bold().yellow());
        let mode = match scan.mode {
            ScanMode::Active => "active".green(),
            ScanMode::Limited => "limited (no raw socket access)".yellow(),
        };
        println!("  Target: {} [{}]", scan.target, mode);
        if let Some(interface) = &scan.interface {
            println!("  Interface: {}", interface);
        }
        if scan.hosts.is_empty() {
            println!("  {}", "No hosts found".dimmed());
            return;
        }
        println!("  Hosts found: {}", scan.hosts.len());
        for host in scan.hosts.values() {
            let mac = host
                .mac
                .map(|m| m.to_string())
                .unwrap_or_else(|| "??:??:??:??:??:??".to_string());
            println!(
                "    {:<15}  {}  {}",
                host.ip,
                mac,
                format!("{:?}", host.source).dimmed()
            );
        }
    }

    pub fn print_network_info(&self, info: &NetworkInfo) {
        println!("{}", "INTERFACE COUNTERS".bold().yellow());
        println!(
            "  Received: {} bytes in {} packets",
            info.bytes_recv, info.packets_recv
        );
        println!(
            "  Sent: {} bytes in {} packets",
            info.bytes_sent, info.packets_sent
        );
        println!("  Interfaces: {}", info.interfaces.join(", "));
    }

    fn print_memory(&self, memory: &MemoryReport) {
        self.print_processes(&memory.processes);
        let mapped: usize = memory.modules.iter().map(|p| p.modules.len()).sum();
        println!(
            "  Mapped files: {} across {} processes",
            mapped,
            memory.modules.len()
        );
    }

    pub fn print_processes(&self, processes: &[ProcessInfo]) {
        println!("{}", "PROCESSES".bold().yellow());
        println!("  Total: {}", processes.len());

        let mut busiest: Vec<&ProcessInfo> = processes.iter().collect();
        busiest.sort_by(|a, b| b.memory_percent.total_cmp(&a.memory_percent));

        println!(
            "  {:>7}  {:<12}  {:>6}  {:>6}  {:>5}  NAME",
            "PID", "USER", "%MEM", "%CPU", "CONN"
        );
        for process in busiest.iter().take(PROCESS_ROWS) {
            let conns = if process.connections.is_empty() {
                "-".normal()
            } else {
                process.connections.len().to_string().cyan()
            };
            println!(
                "  {:>7}  {:<12}  {:>6.2}  {:>6.2}  {:>5}  {}",
                process.pid,
                process.username.as_deref().unwrap_or("?"),
                process.memory_percent,
                process.cpu_percent,
                conns,
                process.name
            );
        }
        if processes.len() > PROCESS_ROWS {
            println!(
                "  {}",
                format!("... {} more", processes.len() - PROCESS_ROWS).dimmed()
            );
        }
    }

    pub fn print_modules(&self, modules: &[ProcessModules]) {
        println!("{}", "LOADED MODULES".bold().yellow());
        for process in modules.iter().filter(|p| !p.modules.is_empty()) {
            println!(
                "  {} {}",
                process.pid.to_string().bold(),
                process.process_name
            );
            for module in &process.modules {
                println!(
                    "      {:>10} KiB rss {:>8} KiB  {}",
                    module.size / 1024,
                    module.rss / 1024,
                    module.path.dimmed()
                );
            }
        }
    }

    pub fn print_rule_matches(&self, target: &str, matches: &[RuleMatch]) {
        if matches.is_empty() {
            println!("{} {}", target, "no matches".green());
            return;
        }
        println!("{} {}", target, format!("{} match(es)", matches.len()).red().bold());
        for m in matches {
            let tags = if m.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", m.tags.join(", "))
            };
            println!("  - {}{}", m.qualified_name().bold(), tags);
            for s in &m.strings {
                println!(
                    "      {} x{} (first at 0x{:x})",
                    s.identifier, s.count, s.first_offset
                );
            }
        }
    }

    fn print_errors(&self, report: &TriageReport) {
        if report.errors.is_empty() {
            println!("{}", "All phases completed".green());
            return;
        }
        println!("{}", "PHASE ERRORS".bold().red());
        for e in &report.errors {
            println!("  - {}: {}", e.phase.bold(), e.message.red());
        }
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}
