// SPDX-License-Identifier: PMPL-1.0-or-later

//! Forensic-Triage: first-response collection for a live Linux host.
//!
//! The crate gathers the evidence an investigator wants in the first hour:
//!
//! 1. **Filesystem**: metadata, digests and pattern-rule hits for every file
//!    under a root, processed on a rayon pool ([`scanner`], [`rules`]).
//! 2. **Network**: ARP host discovery with a raw-socket sweep, or kernel
//!    neighbor state when raw sockets are not permitted ([`network`]).
//! 3. **Memory**: running processes with their connections and mapped
//!    files, read from procfs ([`memory`]).
//!
//! [`triage::TriageSession`] ties the phases together and writes reports.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod memory;
pub mod network;
pub mod report;
pub mod retry;
pub mod rules;
pub mod scanner;
pub mod spectral;
pub mod triage;

pub use config::TriageConfig;
pub use error::{Result, TriageError};
