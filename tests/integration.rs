// SPDX-License-Identifier: PMPL-1.0-or-later

//! End-to-end tests: scan a tree, save, reload and diff.

use forensic_triage::config::TriageConfig;
use forensic_triage::report::{diff_scans, format_diff, latest_reports, ReportFormat};
use forensic_triage::rules::RuleSet;
use forensic_triage::scanner::{ForensicsScanner, HashAlgorithm, ScanResults};
use forensic_triage::triage::{ScanSummary, ScanType, TriageRequest, TriageSession};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const WEBSHELL_RULES: &str = r#"
rule PhpWebshell : webshell php {
    meta:
        author = "ir-team"
        severity = 8
    strings:
        $eval = "eval(" nocase
        $b64 = "base64_decode"
    condition:
        $eval and $b64
}
"#;

fn config() -> TriageConfig {
    let mut config = TriageConfig::default();
    config.scanning.parallel_workers = 2;
    config
}

fn evidence_tree(root: &Path) {
    fs::create_dir_all(root.join("www")).unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join("www/index.php"), "<?php echo 'hi'; ?>").unwrap();
    fs::write(
        root.join("www/shell.php"),
        "<?php EVAL(base64_decode($_POST['x'])); ?>",
    )
    .unwrap();
    fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
    fs::write(root.join("cache.pyc"), [0u8; 16]).unwrap();
}

#[test]
fn test_scan_hashes_and_flags_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("evidence");
    evidence_tree(&root);

    let rules = Arc::new(RuleSet::compile_source("web", WEBSHELL_RULES).unwrap());
    let scanner = ForensicsScanner::new(&root, &config())
        .unwrap()
        .with_rules(rules);
    let files = scanner.scan().unwrap();

    // .git and .pyc are excluded by default
    let names: Vec<String> = files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["index.php", "shell.php"]);

    let shell = &files[1];
    assert_eq!(
        shell.pattern_matches.as_deref(),
        Some(&["web:PhpWebshell".to_string()][..])
    );
    assert_eq!(
        shell.file_hash.as_deref().map(str::len),
        Some(HashAlgorithm::Sha256.hex_len())
    );
    assert_eq!(files[0].pattern_matches.as_deref(), Some(&[][..]));
}

#[test]
fn test_saved_results_reload_and_diff() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("evidence");
    evidence_tree(&root);
    let out = dir.path().join("out");

    let scanner = ForensicsScanner::new(&root, &config()).unwrap();
    let first = scanner.scan().unwrap();
    let base_path = out.join("scan_results_20240101_000000.json");
    scanner.save_results(&first, &base_path).unwrap();

    fs::write(root.join("www/index.php"), "<?php echo 'changed'; ?>").unwrap();
    fs::remove_file(root.join("www/shell.php")).unwrap();
    fs::write(root.join("www/new.php"), "<?php ?>").unwrap();

    let second = scanner.scan().unwrap();
    let compare_path = out.join("scan_results_20240102_000000.json");
    scanner.save_results(&second, &compare_path).unwrap();

    let latest = latest_reports(&out, "scan_results", 2).unwrap();
    assert_eq!(latest, vec![base_path.clone(), compare_path.clone()]);

    let base = ScanResults::load(&base_path).unwrap();
    let compare = ScanResults::load(&compare_path).unwrap();
    assert_eq!(base.file_count, 2);
    assert_eq!(base.configuration.hash_algorithm, HashAlgorithm::Sha256);

    let diff = diff_scans(&base, &compare);
    assert_eq!(diff.added, vec![Path::new("www/new.php").to_path_buf()]);
    assert_eq!(diff.removed, vec![Path::new("www/shell.php").to_path_buf()]);
    assert_eq!(diff.modified.len(), 1);
    assert_eq!(diff.unchanged, 0);

    let text = format_diff(&diff, "base", "compare");
    assert!(text.contains("~ www/index.php"));
}

#[test]
fn test_yaml_results_load() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("evidence");
    evidence_tree(&root);

    let scanner = ForensicsScanner::new(&root, &config()).unwrap();
    let results = scanner.results(scanner.scan().unwrap());
    let path = dir.path().join("scan.yaml");
    fs::write(&path, ReportFormat::Yaml.serialize(&results).unwrap()).unwrap();

    let loaded = ScanResults::load(&path).unwrap();
    assert_eq!(loaded.files.len(), results.files.len());
    assert_eq!(loaded.scanned_directory, results.scanned_directory);
}

#[test]
fn test_triage_system_phase_saves_report() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("evidence");
    evidence_tree(&root);
    let rules_dir = dir.path().join("rules");
    fs::create_dir_all(&rules_dir).unwrap();
    fs::write(rules_dir.join("web.yar"), WEBSHELL_RULES).unwrap();

    let session = TriageSession::new(config(), Some(&dir.path().join("out"))).unwrap();
    let mut request = TriageRequest::new(ScanType::System, session.config());
    request.root = root;
    request.rules_dir = Some(rules_dir);

    let report = session.run(&request);
    assert!(report.is_clean());
    assert!(report.network.is_none() && report.memory.is_none());
    match report.system.as_ref().unwrap() {
        ScanSummary::Success {
            file_count,
            flagged_count,
            ..
        } => {
            assert_eq!(*file_count, 2);
            assert_eq!(*flagged_count, 1);
        }
        other => panic!("unexpected summary: {other:?}"),
    }

    let saved = session.save_results(&report).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(json["scan_type"], "system");
    assert_eq!(json["system"]["status"], "success");
    assert!(json.get("network").is_none());
}

#[test]
fn test_scan_missing_directory_is_error() {
    let dir = TempDir::new().unwrap();
    assert!(ForensicsScanner::new(dir.path().join("nope"), &config()).is_err());
}
