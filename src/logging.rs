// SPDX-License-Identifier: PMPL-1.0-or-later

//! Logging setup for the triage binary.
//!
//! The library only emits `tracing` events; the binary installs a subscriber
//! once, writing to stderr and optionally to the session log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Result, TriageError};

/// Verbosity requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Use the configured level.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Resolve the effective level, falling back to the configured one.
    pub fn level(&self, configured: &str) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => parse_level(configured).unwrap_or(Level::INFO),
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

/// Parse a level name the way the config file spells it.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" | "critical" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Calling this twice is harmless:
/// the first subscriber stays installed and the new one is dropped.
pub fn init_logging(level: Level, log_file: Option<&Path>) -> Result<()> {
    let default_filter = format!("forensic_triage={level},ftriage={level}");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    TriageError::DirectoryCreate {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(file_layer);

    if let Err(e) = subscriber.try_init() {
        tracing::debug!("Keeping the existing subscriber: {e}");
        return Ok(());
    }
    tracing::info!("Logging is set up");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(true, 2), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 3), Verbosity::Trace);
    }

    #[test]
    fn test_normal_uses_configured_level() {
        assert_eq!(Verbosity::Normal.level("warning"), Level::WARN);
        assert_eq!(Verbosity::Normal.level("CRITICAL"), Level::ERROR);
        assert_eq!(Verbosity::Normal.level("bogus"), Level::INFO);
        assert_eq!(Verbosity::Verbose.level("error"), Level::DEBUG);
    }

    #[test]
    fn test_init_logging_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("logs").join("session.log");
        init_logging(Level::INFO, Some(&log)).unwrap();
        assert!(log.exists());
    }

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let dir = tempfile::TempDir::new().unwrap();
        init_logging(Level::INFO, None).unwrap();
        let log = dir.path().join("second.log");
        init_logging(Level::DEBUG, Some(&log)).unwrap();
        // the file is opened before the subscriber is installed
        assert!(log.exists());
    }
}
