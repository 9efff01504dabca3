// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for forensic-triage.
//!
//! Every failure that crosses a module boundary is a [`TriageError`]. Per-file
//! and per-process failures are usually recorded in results instead of being
//! returned, so a single unreadable file never aborts a whole scan.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for triage operations.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller-supplied input (paths, targets, requests) was rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// A file system operation on a scanned path failed.
    #[error("file system error: {0}")]
    FileSystem(String),

    /// A security check refused the operation.
    #[error("security check failed: {0}")]
    Security(String),

    /// Processing a collected item (hashing, parsing) failed.
    #[error("processing error: {0}")]
    Processing(String),

    /// The worker pool could not be built or a worker failed.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// A pattern rule file did not compile.
    #[error("rule compile error in {namespace} (line {line}): {message}")]
    RuleCompile {
        namespace: String,
        line: usize,
        message: String,
    },

    /// Network discovery failed.
    #[error("network error: {0}")]
    Network(String),

    /// Raw network access needs privileges the process does not hold.
    #[error("insufficient privileges: {0}")]
    PermissionDenied(String),

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A specialized Result type for triage operations.
pub type Result<T> = std::result::Result<T, TriageError>;

impl TriageError {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn file_system(message: impl Into<String>) -> Self {
        Self::FileSystem(message.into())
    }

    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    #[must_use]
    pub fn rule_compile(namespace: &str, line: usize, message: impl Into<String>) -> Self {
        Self::RuleCompile {
            namespace: namespace.to_string(),
            line,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Privilege and input problems are permanent; transport hiccups are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::Unsupported
            ),
            _ => false,
        }
    }

    /// Check if this error is a privilege issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        match self {
            Self::PermissionDenied(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }
}
