// SPDX-License-Identifier: PMPL-1.0-or-later

//! Path filtering for directory scans.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{ScanningConfig, SecurityConfig};
use crate::error::{Result, TriageError};

/// Decides whether a walked path should be collected.
///
/// Holds state across calls: symlink targets already reached are remembered
/// so a second link to the same target is refused.
pub struct PathValidator {
    root: PathBuf,
    resolved_root: PathBuf,
    excluded_dirs: HashSet<String>,
    excluded_extensions: HashSet<String>,
    skip_hidden_files: bool,
    max_symlink_depth: usize,
    protected_paths: Vec<String>,
    symlink_targets: HashSet<PathBuf>,
}

impl PathValidator {
    pub fn new(root: &Path, scanning: &ScanningConfig, security: &SecurityConfig) -> Result<Self> {
        let resolved_root = root.canonicalize().map_err(|e| {
            TriageError::file_system(format!("cannot resolve {}: {e}", root.display()))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            resolved_root,
            excluded_dirs: scanning.excluded_dirs.iter().cloned().collect(),
            excluded_extensions: scanning
                .excluded_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            skip_hidden_files: security.skip_hidden_files,
            max_symlink_depth: security.max_symlink_depth,
            protected_paths: security
                .protected_paths
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            symlink_targets: HashSet::new(),
        })
    }

    pub fn resolved_root(&self) -> &Path {
        &self.resolved_root
    }

    /// Check if a path is valid and safe to process.
    ///
    /// Returns `Err` only when the path cannot be resolved at all (dangling
    /// link, permission problem on a parent, symlink loop).
    pub fn is_valid_path(&mut self, path: &Path) -> Result<bool> {
        if !self.passes_name_filters(path) {
            return Ok(false);
        }

        let lowered = path.to_string_lossy().to_lowercase();
        if let Some(fragment) = self
            .protected_paths
            .iter()
            .find(|fragment| lowered.contains(fragment.as_str()))
        {
            debug!("Skipping protected path {} ({fragment})", path.display());
            return Ok(false);
        }

        let is_symlink = fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if is_symlink {
            let depth = symlink_chain_depth(path, self.max_symlink_depth);
            if depth > self.max_symlink_depth {
                warn!(
                    "Symlink chain deeper than {} at {}",
                    self.max_symlink_depth,
                    path.display()
                );
                return Ok(false);
            }
        }

        let resolved = path.canonicalize().map_err(|e| {
            TriageError::validation(format!("invalid path {}: {e}", path.display()))
        })?;

        if !resolved.starts_with(&self.resolved_root) {
            warn!("Path {} is outside base directory", path.display());
            return Ok(false);
        }

        if is_symlink && !self.symlink_targets.insert(resolved) {
            warn!("Symlink loop detected at {}", path.display());
            return Ok(false);
        }

        Ok(true)
    }

    /// Filters that only look at the path text.
    fn passes_name_filters(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);

        let in_excluded_dir = relative.components().any(|component| {
            self.excluded_dirs
                .contains(component.as_os_str().to_string_lossy().as_ref())
        });
        if in_excluded_dir {
            return false;
        }

        if let Some(ext) = path.extension() {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            if self.excluded_extensions.contains(&ext) {
                return false;
            }
        }

        if self.skip_hidden_files {
            let hidden = path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return false;
            }
        }

        true
    }
}

/// Number of symlink hops from `path`, counting at most `limit + 1`.
fn symlink_chain_depth(path: &Path, limit: usize) -> usize {
    let mut current = path.to_path_buf();
    let mut depth = 0;

    while depth <= limit {
        let is_link = fs::symlink_metadata(&current)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            break;
        }
        let Ok(target) = fs::read_link(&current) else {
            break;
        };
        current = if target.is_absolute() {
            target
        } else {
            current
                .parent()
                .map(|parent| parent.join(&target))
                .unwrap_or(target)
        };
        depth += 1;
    }

    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn validator(dir: &Path) -> PathValidator {
        PathValidator::new(dir, &ScanningConfig::default(), &SecurityConfig::default()).unwrap()
    }

    #[test]
    fn test_plain_file_is_valid() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file1.txt");
        fs::write(&file, "Hello World").unwrap();
        assert!(validator(dir.path()).is_valid_path(&file).unwrap());
    }

    #[test]
    fn test_excluded_extension_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("module.PYC");
        fs::write(&file, "").unwrap();
        assert!(!validator(dir.path()).is_valid_path(&file).unwrap());
    }

    #[test]
    fn test_excluded_dir_only_below_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("node_modules").join("project");
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join(".git").join("HEAD"), "ref").unwrap();

        let mut v = validator(&root);
        assert!(v.is_valid_path(&root.join("a.txt")).unwrap());
        assert!(!v.is_valid_path(&root.join(".git").join("HEAD")).unwrap());
    }

    #[test]
    fn test_hidden_files_skipped_when_configured() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(".bash_history");
        fs::write(&file, "ls").unwrap();

        assert!(validator(dir.path()).is_valid_path(&file).unwrap());

        let security = SecurityConfig {
            skip_hidden_files: true,
            ..SecurityConfig::default()
        };
        let mut v = PathValidator::new(dir.path(), &ScanningConfig::default(), &security).unwrap();
        assert!(!v.is_valid_path(&file).unwrap());
    }

    #[test]
    fn test_protected_fragment_skipped() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("PageFile.sys");
        fs::write(&file, "").unwrap();
        assert!(!validator(dir.path()).is_valid_path(&file).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root_rejected() {
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        fs::write(&target, "x").unwrap();

        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(!validator(dir.path()).is_valid_path(&link).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_second_link_to_same_target_rejected() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file1.txt");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("a.lnk")).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("b.lnk")).unwrap();

        let mut v = validator(dir.path());
        assert!(v.is_valid_path(&target).unwrap());
        assert!(v.is_valid_path(&dir.path().join("a.lnk")).unwrap());
        assert!(!v.is_valid_path(&dir.path().join("b.lnk")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_chain_depth_limit() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("data.bin");
        fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink("data.bin", dir.path().join("l1")).unwrap();
        std::os::unix::fs::symlink("l1", dir.path().join("l2")).unwrap();
        std::os::unix::fs::symlink("l2", dir.path().join("l3")).unwrap();

        let security = SecurityConfig {
            max_symlink_depth: 2,
            ..SecurityConfig::default()
        };
        let mut v = PathValidator::new(dir.path(), &ScanningConfig::default(), &security).unwrap();
        assert!(v.is_valid_path(&dir.path().join("l2")).unwrap());
        assert!(!v.is_valid_path(&dir.path().join("l3")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_error() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();
        assert!(validator(dir.path()).is_valid_path(&link).is_err());
    }
}
