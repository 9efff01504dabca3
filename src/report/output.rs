// SPDX-License-Identifier: PMPL-1.0-or-later

//! Serialization formats for persisted reports

use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
}

impl ReportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "json" => Some(ReportFormat::Json),
            "yaml" | "yml" => Some(ReportFormat::Yaml),
            _ => None,
        }
    }

    /// Guess from a file extension; anything unknown is JSON.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
            .unwrap_or_default()
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
        }
    }

    pub fn serialize<T: Serialize>(&self, report: &T) -> Result<String> {
        match self {
            ReportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
            ReportFormat::Yaml => Ok(serde_yaml::to_string(report)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, content: &str) -> Result<T> {
        match self {
            ReportFormat::Json => Ok(serde_json::from_str(content)?),
            ReportFormat::Yaml => Ok(serde_yaml::from_str(content)?),
        }
    }
}

/// Read a report, picking the format from the file extension.
pub fn load_report<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    ReportFormat::from_path(path).deserialize(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ReportFormat::parse("YML"), Some(ReportFormat::Yaml));
        assert_eq!(ReportFormat::parse("json"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::parse("ncl"), None);
    }

    #[test]
    fn test_from_path_defaults_to_json() {
        assert_eq!(
            ReportFormat::from_path(Path::new("a/b.yaml")),
            ReportFormat::Yaml
        );
        assert_eq!(
            ReportFormat::from_path(Path::new("a/b.txt")),
            ReportFormat::Json
        );
        assert_eq!(ReportFormat::from_path(Path::new("a/b")), ReportFormat::Json);
    }

    #[test]
    fn test_yaml_output_is_readable_back() {
        let value = serde_json::json!({"file_count": 3, "status": "completed"});
        let yaml = ReportFormat::Yaml.serialize(&value).unwrap();
        assert!(yaml.contains("file_count: 3"));
        let back: serde_json::Value = ReportFormat::Yaml.deserialize(&yaml).unwrap();
        assert_eq!(back, value);
    }
}
