//! Format detection over a bounded file prefix.
//!
//! Detection is pure and side-effect free: it reads up to
//! [`SNIFF_PREFIX_BYTES`], evaluates descriptors in priority order, and
//! returns the first full match. When nothing matches it assembles a
//! diagnosis of the best partial matches for the caller to surface.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Diagnosis, PartialMatch};
use crate::formats::{registry, FormatDescriptor, FormatId, SNIFF_PREFIX_BYTES};

#[derive(Debug)]
pub enum SniffOutcome {
    Matched(FormatId),
    Unrecognized(Diagnosis),
}

/// Read the sniffing prefix of a file.
pub fn sniff_prefix(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = vec![0u8; SNIFF_PREFIX_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Detect the format of a file, or explain why none matched.
pub fn detect(path: &Path) -> Result<SniffOutcome> {
    let prefix = sniff_prefix(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mut partials: Vec<PartialMatch> = Vec::new();

    for desc in registry() {
        let (matched, satisfied, missing) = evaluate(desc, &prefix, extension.as_deref());
        if matched {
            return Ok(SniffOutcome::Matched(desc.id));
        }
        if satisfied > 0 {
            partials.push(PartialMatch {
                format_name: desc.display_name.to_string(),
                missing_fields: missing,
            });
        }
    }

    Ok(SniffOutcome::Unrecognized(Diagnosis {
        suggestion: "unrecognized_format".to_string(),
        partial_matches: partials,
    }))
}

/// Evaluate one descriptor. Returns (full match, satisfied signature
/// count, missing signature labels).
fn evaluate(
    desc: &FormatDescriptor,
    prefix: &str,
    extension: Option<&str>,
) -> (bool, usize, Vec<String>) {
    let mut satisfied = 0usize;
    let mut missing = Vec::new();

    if !desc.extensions.is_empty() {
        match extension {
            Some(ext) if desc.extensions.contains(&ext) => satisfied += 1,
            _ => missing.push(format!("extension (.{})", desc.extensions.join("/."))),
        }
    }

    for pattern in desc.patterns {
        if pattern_set().is_match(pattern, prefix) {
            satisfied += 1;
        } else {
            missing.push(format!("pattern {pattern}"));
        }
    }

    for field in desc.required_fields {
        if has_json_key(prefix, field) {
            satisfied += 1;
        } else {
            missing.push((*field).to_string());
        }
    }

    (missing.is_empty(), satisfied, missing)
}

/// Whether `"field"` appears as a JSON key (quoted name followed by a
/// colon) anywhere in the prefix.
fn has_json_key(prefix: &str, field: &str) -> bool {
    let needle = format!("\"{field}\"");
    let mut from = 0;
    while let Some(at) = prefix[from..].find(&needle) {
        let after = from + at + needle.len();
        if prefix[after..].trim_start().starts_with(':') {
            return true;
        }
        from = after;
    }
    false
}

/// Signature regexes compiled once per process.
struct PatternSet {
    compiled: Vec<(&'static str, Regex)>,
}

impl PatternSet {
    fn is_match(&self, pattern: &str, prefix: &str) -> bool {
        self.compiled
            .iter()
            .find(|(p, _)| *p == pattern)
            .map(|(_, re)| re.is_match(prefix))
            .unwrap_or(false)
    }
}

fn pattern_set() -> &'static PatternSet {
    static SET: Lazy<PatternSet> = Lazy::new(|| PatternSet {
        compiled: registry()
            .flat_map(|d| d.patterns.iter())
            .map(|p| {
                let re = Regex::new(p).expect("registry patterns are valid regexes");
                (*p, re)
            })
            .collect(),
    });
    &SET
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn detects_chatlab_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "export.json",
            r#"{"chatlab":{"version":"0.0.1","exportedAt":1},"meta":{},"members":[],"messages":[]}"#,
        );
        match detect(&path).unwrap() {
            SniffOutcome::Matched(id) => assert_eq!(id, FormatId::Chatlab),
            other => panic!("expected chatlab, got {other:?}"),
        }
    }

    #[test]
    fn detects_wechat_text_by_header_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "backup.txt",
            "2023-05-01 09:30:00 阿明(wxid_abc)\n早上好\n",
        );
        match detect(&path).unwrap() {
            SniffOutcome::Matched(id) => assert_eq!(id, FormatId::WechatText),
            other => panic!("expected wechat-text, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_input_reports_partial_matches() {
        let dir = tempfile::tempdir().unwrap();
        // Looks json-ish and mentions one chatlab field, but not all.
        let path = write_file(&dir, "odd.json", r#"{"meta": {"hello": 1}}"#);
        match detect(&path).unwrap() {
            SniffOutcome::Unrecognized(diag) => {
                assert_eq!(diag.suggestion, "unrecognized_format");
                let chatlab = diag
                    .partial_matches
                    .iter()
                    .find(|p| p.format_name == "ChatLab export")
                    .expect("chatlab should partially match");
                assert!(chatlab.missing_fields.iter().any(|f| f == "chatlab"));
                assert!(chatlab.missing_fields.iter().any(|f| f == "messages"));
            }
            other => panic!("expected diagnosis, got {other:?}"),
        }
    }

    #[test]
    fn key_match_requires_colon() {
        assert!(has_json_key(r#"{"messages": []}"#, "messages"));
        assert!(has_json_key("{\"messages\"  : []}", "messages"));
        assert!(!has_json_key(r#"{"content": "the \"messages\" word"}"#, "messages"));
    }
}
