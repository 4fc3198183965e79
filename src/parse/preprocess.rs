//! Optional per-format preprocessing of oversized inputs.
//!
//! QQ backups duplicate every message as a heavy `rawElements` payload
//! the importer never reads. Past a size threshold it is cheaper to
//! rewrite the export into a trimmed temp file once than to drag the
//! dead weight through the streaming parse. Preprocessed files are
//! deleted after import regardless of outcome.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::formats::FormatId;
use crate::parse::json_scan::JsonScanner;
use crate::parse::{ParseOptions, ParseProgress};

/// Inputs beyond this size qualify for trimming.
const PREPROCESS_THRESHOLD_BYTES: u64 = 256 * 1024 * 1024;

/// Per-message field the QQ trim pass drops.
const QQ_HEAVY_FIELD: &str = "rawElements";

/// Whether the format wants a preprocessing pass for this input.
pub fn needs_preprocess(format: FormatId, path: &Path) -> Result<bool> {
    match format {
        FormatId::QqBackup => {
            let size = std::fs::metadata(path)?.len();
            if size < PREPROCESS_THRESHOLD_BYTES {
                return Ok(false);
            }
            let prefix = crate::formats::sniff_prefix(path)?;
            Ok(prefix.contains(QQ_HEAVY_FIELD))
        }
        _ => Ok(false),
    }
}

/// Rewrite `path` into a trimmed temp file under `temp_dir` and return
/// the temp path. Only formats reporting `needs_preprocess` are wired
/// through here.
pub fn preprocess(
    format: FormatId,
    path: &Path,
    temp_dir: &Path,
    opts: &ParseOptions,
    on_progress: &mut dyn FnMut(ParseProgress),
) -> Result<PathBuf> {
    match format {
        FormatId::QqBackup => trim_qq(path, temp_dir, opts, on_progress),
        other => anyhow::bail!("format {} has no preprocessor", other.as_str()),
    }
}

fn trim_qq(
    path: &Path,
    temp_dir: &Path,
    opts: &ParseOptions,
    on_progress: &mut dyn FnMut(ParseProgress),
) -> Result<PathBuf> {
    let total_bytes = std::fs::metadata(path)?.len();
    let out_path = temp_dir.join(format!(
        "preprocess_{}.json",
        uuid::Uuid::new_v4().simple()
    ));
    let mut out = BufWriter::new(
        File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?,
    );

    let mut scanner = JsonScanner::new(File::open(path)?);
    let mut elem: Vec<u8> = Vec::new();
    let mut messages_seen: u64 = 0;

    let result = (|| -> Result<()> {
        scanner.begin_object()?;
        out.write_all(b"{")?;
        let mut first_key = true;
        while let Some(key) = scanner.next_key()? {
            if !first_key {
                out.write_all(b",")?;
            }
            first_key = false;
            serde_json::to_writer(&mut out, &key)?;
            out.write_all(b":")?;

            if key == "messages" {
                scanner.begin_array()?;
                out.write_all(b"[")?;
                let mut first_elem = true;
                while scanner.next_element(&mut elem)? {
                    let mut value: serde_json::Value = serde_json::from_slice(&elem)?;
                    if let Some(obj) = value.as_object_mut() {
                        obj.remove(QQ_HEAVY_FIELD);
                    }
                    if !first_elem {
                        out.write_all(b",")?;
                    }
                    first_elem = false;
                    serde_json::to_writer(&mut out, &value)?;

                    messages_seen += 1;
                    if messages_seen % 10_000 == 0 {
                        opts.abort.check()?;
                        on_progress(ParseProgress {
                            bytes_read: scanner.bytes_consumed(),
                            total_bytes,
                            messages_seen,
                        });
                    }
                }
                out.write_all(b"]")?;
            } else {
                let mut raw = Vec::new();
                scanner.capture_value(&mut raw)?;
                out.write_all(&raw)?;
            }
        }
        out.write_all(b"}")?;
        out.flush()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&out_path);
        return Err(e);
    }
    on_progress(ParseProgress {
        bytes_read: scanner.bytes_consumed(),
        total_bytes,
        messages_seen,
    });
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_heavy_fields_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.json");
        std::fs::write(
            &src,
            r#"{"groupInfo":{"name":"G"},"messages":[{"uin":"1","time":1700000000,"content":"hi","rawElements":[{"blob":"xxxx"}]}],"avatars":{}}"#,
        )
        .unwrap();

        let out = trim_qq(&src, dir.path(), &ParseOptions::default(), &mut |_| {}).unwrap();
        let trimmed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(trimmed["groupInfo"]["name"], "G");
        assert_eq!(trimmed["messages"][0]["content"], "hi");
        assert!(trimmed["messages"][0].get("rawElements").is_none());
        assert!(trimmed.get("avatars").is_some());
    }
}
