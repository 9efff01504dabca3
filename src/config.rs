// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration loading and validation.
//!
//! Configuration is resolved in three layers, lowest precedence first:
//! 1. built-in defaults
//! 2. an optional YAML file
//! 3. environment overrides named `DFT_<SECTION>_<OPTION>`
//!
//! Overrides are applied to the YAML value tree before deserialization, and
//! each override is coerced to the type of the value it replaces.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::report::ReportFormat;
use crate::scanner::HashAlgorithm;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "DFT_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub scanning: ScanningConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
    pub security: SecurityConfig,
    pub monitoring: MonitoringConfig,
    pub network: NetworkConfig,
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Files larger than this are listed but not hashed.
    pub max_file_size: u64,
    /// Files smaller than this are listed but not hashed.
    pub min_file_size: u64,
    pub parallel_workers: usize,
    pub hash_algorithm: HashAlgorithm,
    /// Directory names skipped anywhere in a path.
    pub excluded_dirs: Vec<String>,
    /// Extensions (with leading dot) skipped, compared case-insensitively.
    pub excluded_extensions: Vec<String>,
    /// Maximum walk depth below the scan root; `None` walks everything.
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    pub report_format: ReportFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub max_symlink_depth: usize,
    pub skip_hidden_files: bool,
    /// Lower-case path fragments that are never opened.
    pub protected_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub scan_timeout_secs: u64,
    pub alert_on_timeout: bool,
    pub alert_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub default_target: String,
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub backoff_multiplier_secs: f64,
    pub backoff_min_secs: f64,
    pub backoff_max_secs: f64,
    /// Interface used for ARP; picked from the target network when unset.
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub rules_dir: Option<PathBuf>,
    /// Files larger than this are not pattern-matched.
    pub max_scan_bytes: u64,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            min_file_size: 0,
            parallel_workers: 4,
            hash_algorithm: HashAlgorithm::Sha256,
            excluded_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
            ],
            excluded_extensions: vec![".pyc".to_string(), ".pyo".to_string()],
            max_depth: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("forensics_output"),
            report_format: ReportFormat::Json,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_symlink_depth: 8,
            skip_hidden_files: false,
            protected_paths: vec![
                "hiberfil.sys".to_string(),
                "pagefile.sys".to_string(),
                "swapfile.sys".to_string(),
                "dumpstack.log.tmp".to_string(),
            ],
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 300,
            alert_on_timeout: true,
            alert_on_error: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_target: "192.168.1.0/24".to_string(),
            timeout_secs: 2.0,
            max_retries: 3,
            backoff_multiplier_secs: 1.0,
            backoff_min_secs: 4.0,
            backoff_max_secs: 10.0,
            interface: None,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rules_dir: None,
            max_scan_bytes: 32 * 1024 * 1024,
        }
    }
}

impl TriageConfig {
    /// Load configuration using the process environment for overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Load configuration with an explicit set of environment variables.
    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut tree = serde_yaml::to_value(Self::default())?;

        if let Some(path) = path {
            let content = fs::read_to_string(path).map_err(|e| {
                TriageError::configuration(format!("cannot read {}: {e}", path.display()))
            })?;
            let file_tree: Value = serde_yaml::from_str(&content).map_err(|e| {
                TriageError::configuration(format!("cannot parse {}: {e}", path.display()))
            })?;
            if !file_tree.is_null() {
                merge_values(&mut tree, file_tree);
            }
            info!("Configuration loaded from {}", path.display());
        }

        apply_env_overrides(&mut tree, vars);

        let config: Self = serde_yaml::from_value(tree)
            .map_err(|e| TriageError::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let scanning = &self.scanning;
        if scanning.max_file_size < scanning.min_file_size {
            return Err(TriageError::configuration(
                "max_file_size must be greater than min_file_size",
            ));
        }
        if scanning.parallel_workers < 1 {
            return Err(TriageError::configuration(
                "parallel_workers must be at least 1",
            ));
        }

        let network = &self.network;
        if network.max_retries < 1 {
            return Err(TriageError::configuration("max_retries must be at least 1"));
        }
        if network.timeout_secs.is_nan() || network.timeout_secs <= 0.0 {
            return Err(TriageError::configuration(
                "network timeout must be positive",
            ));
        }
        if network.backoff_min_secs < 0.0 || network.backoff_min_secs > network.backoff_max_secs {
            return Err(TriageError::configuration(
                "backoff_min_secs must be between 0 and backoff_max_secs",
            ));
        }
        if crate::logging::parse_level(&self.logging.level).is_none() {
            return Err(TriageError::configuration(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Rules directory, if one is configured and exists on disk.
    pub fn rules_dir(&self) -> Option<&Path> {
        self.rules.rules_dir.as_deref()
    }
}

/// Recursively overlay `overlay` onto `base`. Mappings merge; anything else
/// replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `DFT_<SECTION>_<OPTION>` overrides onto a config value tree.
///
/// The first underscore after the prefix separates the section from the
/// option, so `DFT_SCANNING_MAX_FILE_SIZE` sets `scanning.max_file_size`.
/// An override is kept only if the tree still deserializes with it in place;
/// anything else is logged and dropped.
pub fn apply_env_overrides<I>(tree: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let lowered = rest.to_ascii_lowercase();
        let Some((section, option)) = lowered.split_once('_') else {
            continue;
        };
        if option.is_empty() {
            continue;
        }

        let option_key = Value::String(option.to_string());
        let Some(existing) = tree
            .get(section)
            .and_then(Value::as_mapping)
            .and_then(|map| map.get(&option_key))
        else {
            debug!("Ignoring override {key}: no option {section}.{option}");
            continue;
        };

        let candidates = match coerce_like(existing, &raw) {
            Ok(candidates) => candidates,
            Err(message) => {
                warn!("Invalid environment override {key}: {message}");
                continue;
            }
        };

        let mut last_error = None;
        let accepted = candidates.into_iter().find_map(|value| {
            let mut candidate = tree.clone();
            if let Some(map) = candidate.get_mut(section).and_then(Value::as_mapping_mut) {
                map.insert(option_key.clone(), value);
            }
            match serde_yaml::from_value::<TriageConfig>(candidate.clone()) {
                Ok(_) => Some(candidate),
                Err(e) => {
                    last_error = Some(e);
                    None
                }
            }
        });

        match accepted {
            Some(candidate) => {
                *tree = candidate;
                debug!("Override {section}.{option} from environment");
            }
            None => {
                let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
                warn!("Invalid environment override {key}: {reason}");
            }
        }
    }
}

/// Typed readings of `raw`, most specific first, shaped like `existing`.
fn coerce_like(existing: &Value, raw: &str) -> std::result::Result<Vec<Value>, String> {
    let trimmed = raw.trim();
    match existing {
        Value::Bool(_) => Ok(vec![Value::Bool(trimmed.eq_ignore_ascii_case("true"))]),
        Value::Number(n) if n.is_f64() => trimmed
            .parse::<f64>()
            .map(|v| vec![Value::Number(v.into())])
            .map_err(|e| e.to_string()),
        Value::Number(_) => trimmed
            .parse::<i64>()
            .map(|v| vec![Value::Number(v.into())])
            .map_err(|e| e.to_string()),
        Value::Sequence(_) => Ok(vec![Value::Sequence(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )]),
        // Unset optional: the option's type is unknown, so try a number and
        // fall back to the raw string.
        Value::Null => {
            let text = Value::String(trimmed.to_string());
            Ok(match trimmed.parse::<i64>() {
                Ok(v) => vec![Value::Number(v.into()), text],
                Err(_) => vec![text],
            })
        }
        Value::Mapping(_) => Err("cannot override a whole section".to_string()),
        _ => Ok(vec![Value::String(raw.to_string())]),
    }
}

/// Render the effective configuration as YAML.
pub fn to_yaml(config: &TriageConfig) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TriageConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scanning.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.network.max_retries, 3);
        assert_eq!(config.network.default_target, "192.168.1.0/24");
    }

    #[test]
    fn test_env_overrides_are_typed() {
        let config = TriageConfig::load_with_env(
            None,
            env(&[
                ("DFT_SCANNING_MAX_FILE_SIZE", "2048"),
                ("DFT_SECURITY_SKIP_HIDDEN_FILES", "TRUE"),
                ("DFT_NETWORK_TIMEOUT_SECS", "0.5"),
                ("DFT_SCANNING_EXCLUDED_DIRS", "target, .cache"),
                ("DFT_NETWORK_INTERFACE", "eth0"),
                ("DFT_SCANNING_MAX_DEPTH", "3"),
                ("UNRELATED", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.scanning.max_file_size, 2048);
        assert!(config.security.skip_hidden_files);
        assert!((config.network.timeout_secs - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.scanning.excluded_dirs, vec!["target", ".cache"]);
        assert_eq!(config.network.interface.as_deref(), Some("eth0"));
        assert_eq!(config.scanning.max_depth, Some(3));
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let config = TriageConfig::load_with_env(
            None,
            env(&[
                ("DFT_SCANNING_PARALLEL_WORKERS", "many"),
                ("DFT_NOSUCH_OPTION", "1"),
                ("DFT_SCANNING", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(config.scanning.parallel_workers, 4);
    }

    #[test]
    fn test_overrides_that_do_not_fit_are_dropped() {
        let config = TriageConfig::load_with_env(
            None,
            env(&[
                ("DFT_SCANNING_MAX_FILE_SIZE", "-1"),
                ("DFT_OUTPUT_REPORT_FORMAT", "xml"),
                ("DFT_SCANNING_HASH_ALGORITHM", "md5"),
                ("DFT_SCANNING_PARALLEL_WORKERS", "8"),
            ]),
        )
        .unwrap();
        assert_eq!(config.scanning.max_file_size, 100 * 1024 * 1024);
        assert_eq!(config.output.report_format, ReportFormat::Json);
        assert_eq!(config.scanning.hash_algorithm, HashAlgorithm::Sha256);
        // good overrides next to bad ones still apply
        assert_eq!(config.scanning.parallel_workers, 8);
    }

    #[test]
    fn test_numeric_text_for_optional_string() {
        let config = TriageConfig::load_with_env(
            None,
            env(&[("DFT_NETWORK_INTERFACE", "0"), ("DFT_RULES_RULES_DIR", "42")]),
        )
        .unwrap();
        assert_eq!(config.network.interface.as_deref(), Some("0"));
        assert_eq!(config.rules.rules_dir, Some(PathBuf::from("42")));
    }

    #[test]
    fn test_yaml_file_merges_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("triage.yaml");
        fs::write(
            &path,
            "scanning:\n  hash_algorithm: blake3\n  parallel_workers: 2\noutput:\n  report_format: yaml\n",
        )
        .unwrap();

        let config = TriageConfig::load_with_env(Some(&path), Vec::new()).unwrap();
        assert_eq!(config.scanning.hash_algorithm, HashAlgorithm::Blake3);
        assert_eq!(config.scanning.parallel_workers, 2);
        assert_eq!(config.output.report_format, ReportFormat::Yaml);
        // untouched keys keep their defaults
        assert_eq!(config.scanning.max_file_size, 100 * 1024 * 1024);
    }

    #[test]
    fn test_validation_rejects_inverted_sizes() {
        let result = TriageConfig::load_with_env(
            None,
            env(&[
                ("DFT_SCANNING_MIN_FILE_SIZE", "100"),
                ("DFT_SCANNING_MAX_FILE_SIZE", "10"),
            ]),
        );
        assert!(matches!(result, Err(TriageError::Configuration(_))));
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = TriageConfig::default();
        config.scanning.parallel_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = TriageConfig::load_with_env(Some(Path::new("/no/such/triage.yaml")), Vec::new());
        assert!(matches!(result, Err(TriageError::Configuration(_))));
    }

    #[test]
    fn test_unknown_hash_algorithm_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("triage.yaml");
        fs::write(&path, "scanning:\n  hash_algorithm: md4\n").unwrap();
        assert!(TriageConfig::load_with_env(Some(&path), Vec::new()).is_err());
    }
}
