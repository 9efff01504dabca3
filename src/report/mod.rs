// SPDX-License-Identifier: PMPL-1.0-or-later

//! Report output: serialization formats, files on disk, console and diffs

pub mod diff;
pub mod formatter;
pub mod output;
pub mod storage;

pub use diff::{diff_scans, format_diff, FileChange, ScanDiff};
pub use formatter::ReportFormatter;
pub use output::{load_report, ReportFormat};
pub use storage::{latest_reports, persist_report, FILE_TIMESTAMP_FORMAT};

use crate::triage::TriageReport;

/// Print a triage report to the console
pub fn print_report(report: &TriageReport) {
    ReportFormatter::new().print(report);
}
