// SPDX-License-Identifier: PMPL-1.0-or-later

//! YARA pattern rules for flagging suspicious file content.
//!
//! Rules are compiled with `yara-x`. Each `.yar`/`.yara` file in the rules
//! directory becomes its own namespace, named by the file stem; a file that
//! fails to compile is reported and skipped.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use yara_x::{Compiler, Rules, Scanner};

use crate::error::{Result, TriageError};

/// Parentheses plus chained `not` allowed in one condition.
const MAX_CONDITION_NESTING: usize = 256;

/// A rule that matched a buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub namespace: String,
    pub rule: String,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, MetaValue>,
    pub strings: Vec<StringMatch>,
}

impl RuleMatch {
    /// `namespace:rule`, the form stored in scan records.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.rule)
    }
}

/// Hits for one string of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMatch {
    pub identifier: String,
    pub count: usize,
    pub first_offset: usize,
}

/// A `meta:` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl MetaValue {
    #[allow(unreachable_patterns)]
    fn from_yara(value: yara_x::MetaValue<'_>) -> Option<Self> {
        match value {
            yara_x::MetaValue::Integer(i) => Some(Self::Integer(i)),
            yara_x::MetaValue::Float(f) => Some(Self::Float(f)),
            yara_x::MetaValue::Bool(b) => Some(Self::Bool(b)),
            yara_x::MetaValue::String(s) => Some(Self::Text(s.to_string())),
            yara_x::MetaValue::Bytes(b) => {
                let bytes: &[u8] = b.as_ref();
                Some(Self::Text(String::from_utf8_lossy(bytes).into_owned()))
            }
            _ => None,
        }
    }
}

/// Compiled rules plus the sources they came from.
pub struct RuleSet {
    sources: Vec<(String, String)>,
    rules: Rules,
    rule_count: usize,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            rules: Compiler::new().build(),
            rule_count: 0,
        }
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile one source into a set with a single namespace.
    pub fn compile_source(namespace: &str, source: &str) -> Result<Self> {
        let mut set = Self::new();
        set.add_source(namespace, source)?;
        Ok(set)
    }

    /// Compile `source` and append it as `namespace`. On error the set is
    /// left as it was.
    pub fn add_source(&mut self, namespace: &str, source: &str) -> Result<()> {
        check_nesting(namespace, source)?;

        let mut compiler = Compiler::new();
        for (ns, src) in self
            .sources
            .iter()
            .map(|(ns, src)| (ns.as_str(), src.as_str()))
            .chain(std::iter::once((namespace, source)))
        {
            compiler.new_namespace(ns);
            compiler
                .add_source(src)
                .map_err(|e| compile_error(ns, &e.to_string()))?;
        }

        self.rules = compiler.build();
        self.rule_count += count_rules_in_content(source);
        self.sources.push((namespace.to_string(), source.to_string()));
        Ok(())
    }

    /// Load every rule file in `dir`.
    ///
    /// Returns `Ok(None)` when the directory is missing, is not a directory,
    /// or holds no rule file that compiles.
    pub fn load_dir(dir: &Path) -> Result<Option<Self>> {
        if !dir.exists() {
            warn!("Rules path does not exist: {}", dir.display());
            return Ok(None);
        }
        if !dir.is_dir() {
            warn!("Rules path is not a directory: {}", dir.display());
            return Ok(None);
        }

        let mut files: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_rule_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            warn!("No rule files found in {}", dir.display());
            return Ok(None);
        }

        let mut set = Self::new();
        for path in &files {
            let namespace = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(e) => {
                    error!("Cannot read rule file {}: {e}", path.display());
                    continue;
                }
            };
            match set.add_source(&namespace, &source) {
                Ok(()) => info!("Loaded rules from {}", path.display()),
                Err(e) => error!("Failed to compile {}: {e}", path.display()),
            }
        }

        if set.is_empty() {
            return Ok(None);
        }
        info!(
            "Loaded {} rules in {} namespaces",
            set.rule_count(),
            set.sources.len()
        );
        Ok(Some(set))
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(ns, _)| ns.as_str())
    }

    pub fn scan_bytes(&self, data: &[u8]) -> Result<Vec<RuleMatch>> {
        let mut scanner = Scanner::new(&self.rules);
        let results = scanner
            .scan(data)
            .map_err(|e| TriageError::processing(format!("rule scan failed: {e}")))?;
        Ok(results.matching_rules().map(to_match).collect())
    }

    /// Scan the first `limit` bytes of a file. `filesize` in conditions is
    /// the number of bytes scanned.
    pub fn scan_file(&self, path: &Path, limit: u64) -> Result<Vec<RuleMatch>> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let mut data = Vec::with_capacity(size.min(limit) as usize);
        file.take(limit).read_to_end(&mut data)?;
        self.scan_bytes(&data)
    }
}

fn to_match(rule: yara_x::Rule) -> RuleMatch {
    let strings = rule
        .patterns()
        .filter_map(|pattern| {
            let mut hits = pattern.matches();
            let first = hits.next()?;
            Some(StringMatch {
                identifier: format!("${}", pattern.identifier().trim_start_matches('$')),
                count: 1 + hits.count(),
                first_offset: first.range().start,
            })
        })
        .collect();

    RuleMatch {
        namespace: rule.namespace().to_string(),
        rule: rule.identifier().to_string(),
        tags: rule.tags().map(|tag| tag.identifier().to_string()).collect(),
        meta: rule
            .metadata()
            .filter_map(|(key, value)| MetaValue::from_yara(value).map(|v| (key.to_string(), v)))
            .collect(),
        strings,
    }
}

/// Turn a `yara-x` diagnostic report into a [`TriageError::RuleCompile`].
///
/// The report starts with the error title and locates it on a
/// `--> origin:line:column` line.
fn compile_error(namespace: &str, report: &str) -> TriageError {
    let line = report
        .lines()
        .find_map(|l| l.trim_start().strip_prefix("-->"))
        .and_then(|location| location.trim().split(':').nth(1))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    let message = report.lines().next().unwrap_or(report).trim().to_string();
    TriageError::rule_compile(namespace, line, message)
}

/// Count `rule` declarations, including private and global ones.
fn count_rules_in_content(content: &str) -> usize {
    content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            ["rule ", "private rule ", "global rule ", "private global rule ", "global private rule "]
                .iter()
                .any(|prefix| trimmed.starts_with(prefix))
        })
        .count()
}

/// Reject sources whose conditions nest deeper than
/// [`MAX_CONDITION_NESTING`], before they reach the recursive compiler.
fn check_nesting(namespace: &str, source: &str) -> Result<()> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut negations = 0usize;
    let mut line = 1usize;
    let mut i = 0;

    // Skip to just past the next unescaped `close`, counting newlines.
    let skip_quoted = |start: usize, close: u8, line: &mut usize| -> usize {
        let mut j = start;
        while j < bytes.len() {
            match bytes[j] {
                b'\\' => j += 1,
                b'\n' => *line += 1,
                c if c == close => return j + 1,
                _ => {}
            }
            j += 1;
        }
        j
    };

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'"' => i = skip_quoted(i + 1, b'"', &mut line),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    if bytes[i] == b'\n' {
                        line += 1;
                    }
                    i += 1;
                }
                i += 2;
            }
            b'/' => i = skip_quoted(i + 1, b'/', &mut line),
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                negations = 0;
                i += 1;
            }
            c if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                i = i.max(start + 1);
                if &bytes[start..i] == b"not" {
                    negations += 1;
                } else {
                    negations = 0;
                }
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                negations = 0;
                i += 1;
            }
        }

        if depth + negations > MAX_CONDITION_NESTING {
            return Err(TriageError::rule_compile(
                namespace,
                line,
                format!("condition nested more than {MAX_CONDITION_NESTING} levels deep"),
            ));
        }
    }
    Ok(())
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            ext == "yar" || ext == "yara"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WEBSHELL: &str = r#"
rule php_eval : webshell {
    strings:
        $eval = "eval(" nocase
    condition:
        $eval
}
"#;

    fn names(set: &RuleSet, data: &[u8]) -> Vec<String> {
        set.scan_bytes(data)
            .unwrap()
            .into_iter()
            .map(|m| m.rule)
            .collect()
    }

    #[test]
    fn test_qualified_name() {
        let set = RuleSet::compile_source("webshell", WEBSHELL).unwrap();
        let found = set.scan_bytes(b"<?php EVAL($_POST['x']); ?>").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].qualified_name(), "webshell:php_eval");
    }

    #[test]
    fn test_regex_flags() {
        let set = RuleSet::compile_source(
            "t",
            r#"
            rule shell { strings: $r = /eval\s*\(\s*base64_decode/i condition: $r }
            rule dot { strings: $r = /a.b/s condition: $r }
            rule plain { strings: $r = /eval\(/ condition: $r }
            "#,
        )
        .unwrap();
        assert_eq!(names(&set, b"EVAL ( BASE64_DECODE('x'))"), vec!["shell"]);
        assert_eq!(names(&set, b"a\nb"), vec!["dot"]);
    }

    #[test]
    fn test_private_and_rule_reference() {
        let set = RuleSet::compile_source(
            "t",
            r##"
            private rule is_script { strings: $s = "#!" condition: $s }
            rule script_with_curl { strings: $c = "curl" condition: is_script and $c }
            "##,
        )
        .unwrap();
        assert_eq!(
            names(&set, b"#!/bin/sh\ncurl http://x | sh"),
            vec!["script_with_curl"]
        );
        assert!(names(&set, b"curl only").is_empty());
    }

    #[test]
    fn test_match_details() {
        let set = RuleSet::compile_source(
            "t",
            r#"rule r : tag1 { meta: author = "x" severity = 7 strings: $a = "needle" $b = "none" condition: $a or $b }"#,
        )
        .unwrap();
        let found = set.scan_bytes(b"hay needle hay needle").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, vec!["tag1"]);
        assert_eq!(found[0].meta["author"], MetaValue::Text("x".into()));
        assert_eq!(found[0].meta["severity"], MetaValue::Integer(7));
        assert_eq!(found[0].strings.len(), 1);
        assert_eq!(found[0].strings[0].identifier, "$a");
        assert_eq!(found[0].strings[0].count, 2);
        assert_eq!(found[0].strings[0].first_offset, 4);
    }

    #[test]
    fn test_failed_add_keeps_existing_rules() {
        let mut set = RuleSet::compile_source("web", WEBSHELL).unwrap();
        assert!(set.add_source("bad", "rule x { condition: $nope }").is_err());
        assert_eq!(set.namespaces().collect::<Vec<_>>(), vec!["web"]);
        assert_eq!(names(&set, b"eval("), vec!["php_eval"]);
    }

    #[test]
    fn test_extreme_integer_literal_does_not_panic() {
        let _ = RuleSet::compile_source("t", "rule n { condition: -9223372036854775808 == 0 }");
        let _ = RuleSet::compile_source("t", "rule n { condition: 99999999999999999999 > 0 }");
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let negations = format!("rule deep {{ condition: {}true }}", "not ".repeat(200_000));
        let err = RuleSet::compile_source("t", &negations).err().unwrap();
        assert!(matches!(err, TriageError::RuleCompile { .. }));

        let parens = format!(
            "rule deep {{ condition: {}true{} }}",
            "(".repeat(10_000),
            ")".repeat(10_000)
        );
        assert!(RuleSet::compile_source("t", &parens).is_err());

        // ordinary nesting, and parentheses inside strings and regexes, pass
        let fine = r#"
            rule ok {
                strings: $a = "((((" $b = /\(+x/
                condition: not (not ($a or (not $b)))
            }
        "#;
        RuleSet::compile_source("t", fine).unwrap();
    }

    #[test]
    fn test_load_dir_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("webshell.yar"), WEBSHELL).unwrap();
        fs::write(dir.path().join("broken.yara"), "rule { condition: }").unwrap();
        fs::write(dir.path().join("notes.txt"), "rule x { condition: true }").unwrap();

        let set = RuleSet::load_dir(dir.path()).unwrap().unwrap();
        assert_eq!(set.namespaces().collect::<Vec<_>>(), vec!["webshell"]);
        assert_eq!(set.rule_count(), 1);
    }

    #[test]
    fn test_load_dir_none_cases() {
        let dir = TempDir::new().unwrap();
        assert!(RuleSet::load_dir(&dir.path().join("missing")).unwrap().is_none());
        assert!(RuleSet::load_dir(dir.path()).unwrap().is_none());

        let file = dir.path().join("rules.yar");
        fs::write(&file, WEBSHELL).unwrap();
        assert!(RuleSet::load_dir(&file).unwrap().is_none());

        fs::write(&file, "rule bad {").unwrap();
        assert!(RuleSet::load_dir(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_scan_file_reads_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload.bin");
        let mut content = vec![b'A'; 64];
        content.extend_from_slice(b"MARKER");
        fs::write(&path, &content).unwrap();

        let set = RuleSet::compile_source(
            "t",
            r#"
            rule marker { strings: $m = "MARKER" condition: $m }
            rule big { condition: filesize > 64 }
            "#,
        )
        .unwrap();

        assert!(set.scan_file(&path, 32).unwrap().is_empty());
        assert_eq!(set.scan_file(&path, 1024).unwrap().len(), 2);
    }

    #[test]
    fn test_rule_count_includes_private_and_global() {
        let source = "rule a { condition: true }\n  private rule b { condition: true }\nglobal rule c { condition: true }\n";
        assert_eq!(count_rules_in_content(source), 3);
    }
}
