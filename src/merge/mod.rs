//! Merger: several overlapping exports of one conversation → one
//! canonical export.
//!
//! Every source is parsed into a staging store first; the merge then
//! walks all stores one timestamp bucket at a time, so memory is
//! bounded by the largest single-second bucket rather than the corpus.
//! Within a bucket the duplicate key is
//! `(timestamp, sender platform id, content length)` and the
//! first-processed variant wins — callers express a conflict
//! resolution by ordering the sources they pass in. Walking buckets in
//! ascending order means the output is already timestamp-sorted.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::error::CoreError;
use crate::import::{self, ImportOptions, ImportOutcome, ProgressFn};
use crate::parse::AbortOption;
use crate::paths::{remove_store_files, AppDirs};
use crate::store::{staging, StagingStore};
use crate::types::{
    ChatlabStamp, ExportMember, ExportMessage, ExportMeta, ExportSource, ParsedMeta, Platform,
    RawMessage, CHATLAB_FORMAT_VERSION,
};

/// Pure image markers auto-deduplicate even when filenames differ.
static PURE_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[图片:\s*.+\]$").expect("valid image marker regex"));

/// Staging stores by source path, reused between a conflict check and
/// the merge that follows it. Swept on worker start, after a merge, and
/// on `merge.clearCache`.
#[derive(Default)]
pub struct MergeCache {
    entries: HashMap<PathBuf, PathBuf>,
}

impl MergeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (parsing if needed) the staging store for a source.
    pub fn staging_for(
        &mut self,
        dirs: &AppDirs,
        source: &Path,
        opts: &ImportOptions,
    ) -> Result<StagingStore> {
        if let Some(existing) = self.entries.get(source) {
            if existing.exists() {
                return StagingStore::open(existing);
            }
            self.entries.remove(source);
        }
        let tag = format!("src_{}", uuid::Uuid::new_v4().simple());
        let staging_path = dirs.staging_db(&tag);
        let (store, _) = staging::stage_source(source, &staging_path, &opts.parse_options())?;
        self.entries.insert(source.to_path_buf(), staging_path);
        Ok(store)
    }

    pub fn clear(&mut self) {
        for (_, staging_path) in self.entries.drain() {
            let _ = remove_store_files(&staging_path);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub timestamp: i64,
    pub sender_platform_id: String,
    /// Indices into the source list passed by the caller.
    pub source1: usize,
    pub source2: usize,
    pub content1: Option<String>,
    pub content2: Option<String>,
    pub content_length1: u64,
    pub content_length2: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    pub auto_deduplicated: u64,
    /// Size of the post-deduplication message set.
    pub merged_message_count: u64,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub export_path: String,
    pub message_count: u64,
    pub member_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn content_chars(content: &Option<String>) -> u64 {
    content.as_deref().map(|c| c.chars().count()).unwrap_or(0) as u64
}

/// Single platform across all sources, or `mixed_platforms`.
fn common_platform(stores: &[StagingStore]) -> Result<(Platform, Vec<ParsedMeta>)> {
    let mut metas = Vec::new();
    let mut tags: Vec<&'static str> = Vec::new();
    for store in stores {
        let meta = store
            .read_meta()?
            .ok_or_else(|| CoreError::Parse("staging store has no meta".into()))?;
        if !tags.contains(&meta.platform.as_str()) {
            tags.push(meta.platform.as_str());
        }
        metas.push(meta);
    }
    if tags.len() > 1 {
        return Err(CoreError::MixedPlatforms {
            platforms: tags.iter().map(|t| t.to_string()).collect(),
        }
        .into());
    }
    let platform = metas
        .first()
        .map(|m| m.platform)
        .unwrap_or(Platform::Unknown);
    Ok((platform, metas))
}

/// Step all stores to the next timestamp bucket at or above `after`.
fn next_bucket_ts(stores: &[StagingStore], after: Option<i64>) -> Result<Option<i64>> {
    let mut next: Option<i64> = None;
    for store in stores {
        if let Some(ts) = store.min_ts_after(after)? {
            next = Some(match next {
                Some(n) => n.min(ts),
                None => ts,
            });
        }
    }
    Ok(next)
}

/// Detect timestamp/sender conflicts across sources.
pub fn check_conflicts(stores: &[StagingStore], abort: &AbortOption) -> Result<ConflictReport> {
    let (platform, _) = common_platform(stores)?;

    let mut conflicts = Vec::new();
    let mut auto_deduplicated = 0u64;
    let mut merged_count = 0u64;

    let mut cursor: Option<i64> = None;
    while let Some(ts) = next_bucket_ts(stores, cursor)? {
        abort.check()?;
        cursor = Some(ts);

        // (sender → per-source messages)
        let mut by_sender: HashMap<String, Vec<(usize, RawMessage)>> = HashMap::new();
        for (idx, store) in stores.iter().enumerate() {
            for msg in store.messages_at(ts)? {
                by_sender
                    .entry(msg.sender_platform_id.clone())
                    .or_default()
                    .push((idx, msg));
            }
        }

        for (sender, group) in by_sender {
            let mut keys: HashSet<u64> = HashSet::new();
            for (_, msg) in &group {
                keys.insert(content_chars(&msg.content));
            }
            merged_count += keys.len() as u64;

            let sources: HashSet<usize> = group.iter().map(|(idx, _)| *idx).collect();
            if sources.len() < 2 {
                continue;
            }

            // bucket again by exact content
            let mut variants: Vec<(Option<String>, Vec<usize>)> = Vec::new();
            for (idx, msg) in &group {
                match variants.iter_mut().find(|(c, _)| c == &msg.content) {
                    Some((_, srcs)) => srcs.push(*idx),
                    None => variants.push((msg.content.clone(), vec![*idx])),
                }
            }

            if variants.len() == 1 {
                auto_deduplicated += group.len() as u64 - 1;
                continue;
            }

            for i in 0..variants.len() {
                for j in (i + 1)..variants.len() {
                    let (content1, sources1) = &variants[i];
                    let (content2, sources2) = &variants[j];
                    let cross_source = sources1
                        .iter()
                        .any(|s1| sources2.iter().any(|s2| s1 != s2));
                    if !cross_source {
                        continue;
                    }
                    if is_pure_image(content1) && is_pure_image(content2) {
                        auto_deduplicated += 1;
                        continue;
                    }
                    conflicts.push(Conflict {
                        timestamp: ts,
                        sender_platform_id: sender.clone(),
                        source1: sources1[0],
                        source2: sources2[0],
                        content1: content1.clone(),
                        content2: content2.clone(),
                        content_length1: content_chars(content1),
                        content_length2: content_chars(content2),
                    });
                }
            }
        }
    }

    Ok(ConflictReport {
        conflicts,
        auto_deduplicated,
        merged_message_count: merged_count,
        platform,
    })
}

fn is_pure_image(content: &Option<String>) -> bool {
    content
        .as_deref()
        .map(|c| PURE_IMAGE_RE.is_match(c))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub sources: Vec<PathBuf>,
    /// Re-import the canonical output and return its session id.
    pub reimport: bool,
}

/// Merge the staged sources into a canonical export file, optionally
/// re-importing it as a new session.
pub fn merge_files(
    dirs: &AppDirs,
    cache: &mut MergeCache,
    request: &MergeRequest,
    opts: &ImportOptions,
    progress: ProgressFn<'_>,
) -> Result<MergeOutcome> {
    if request.sources.is_empty() {
        return Err(CoreError::Parse("merge requires at least one source".into()).into());
    }
    let mut stores = Vec::new();
    for source in &request.sources {
        stores.push(cache.staging_for(dirs, source, opts)?);
    }
    let (platform, metas) = common_platform(&stores)?;

    // union-merge members: the last source with a non-empty value wins
    let mut member_order: Vec<String> = Vec::new();
    let mut members: HashMap<String, ExportMember> = HashMap::new();
    for store in &stores {
        for member in store.list_members()? {
            match members.get_mut(&member.platform_id) {
                Some(existing) => {
                    if !member.account_name.is_empty() {
                        existing.account_name = member.account_name;
                    }
                    if member.group_nickname.as_deref().map_or(false, |n| !n.is_empty()) {
                        existing.group_nickname = member.group_nickname;
                    }
                    if member.avatar.as_deref().map_or(false, |a| !a.is_empty()) {
                        existing.avatar = member.avatar;
                    }
                }
                None => {
                    member_order.push(member.platform_id.clone());
                    members.insert(
                        member.platform_id.clone(),
                        ExportMember {
                            platform_id: member.platform_id,
                            account_name: member.account_name,
                            group_nickname: member.group_nickname,
                            aliases: None,
                            avatar: member.avatar,
                        },
                    );
                }
            }
        }
    }

    let name = metas
        .iter()
        .map(|m| m.name.as_str())
        .find(|n| !n.is_empty())
        .unwrap_or("merged")
        .to_string();
    let mut sources_meta = Vec::new();
    for (i, source) in request.sources.iter().enumerate() {
        sources_meta.push(ExportSource {
            filename: source
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            platform: Some(metas[i].platform),
            message_count: stores[i].message_count()?,
        });
    }
    let meta = ExportMeta {
        name: name.clone(),
        platform,
        kind: metas
            .first()
            .map(|m| m.kind)
            .unwrap_or(crate::types::SessionKind::Group),
        sources: Some(sources_meta),
        group_id: metas.iter().find_map(|m| m.group_id.clone()),
        group_avatar: metas.iter().find_map(|m| m.group_avatar.clone()),
    };

    let export_path = export_file_path(dirs, &name);
    let message_count = write_export(
        &export_path,
        &meta,
        &member_order,
        &members,
        &stores,
        &opts.abort,
    )
    .with_context(|| format!("failed to write {}", export_path.display()))?;

    let session_id = if request.reimport {
        let outcome: ImportOutcome = import::import_file(dirs, &export_path, opts, progress)?;
        Some(outcome.session_id)
    } else {
        None
    };

    // merge complete: close the staging handles, then drop the files
    drop(stores);
    cache.clear();
    info!(path = %export_path.display(), messages = message_count, "merge complete");

    Ok(MergeOutcome {
        export_path: export_path.display().to_string(),
        message_count,
        member_count: member_order.len() as u64,
        session_id,
    })
}

fn export_file_path(dirs: &AppDirs, name: &str) -> PathBuf {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let date = chrono::Local::now().format("%Y%m%d");
    dirs.merged().join(format!("{safe}_merged_{date}.json"))
}

/// Stream the merged, deduplicated message set into a canonical export.
fn write_export(
    path: &Path,
    meta: &ExportMeta,
    member_order: &[String],
    members: &HashMap<String, ExportMember>,
    stores: &[StagingStore],
    abort: &AbortOption,
) -> Result<u64> {
    let mut out = BufWriter::new(File::create(path)?);

    let stamp = ChatlabStamp {
        version: CHATLAB_FORMAT_VERSION.to_string(),
        exported_at: chrono::Utc::now().timestamp(),
        generator: Some(format!("chatlab-core {}", env!("CARGO_PKG_VERSION"))),
        description: None,
    };
    out.write_all(b"{\"chatlab\":")?;
    serde_json::to_writer(&mut out, &stamp)?;
    out.write_all(b",\"meta\":")?;
    serde_json::to_writer(&mut out, meta)?;

    out.write_all(b",\"members\":[")?;
    for (i, platform_id) in member_order.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        serde_json::to_writer(&mut out, &members[platform_id])?;
    }
    out.write_all(b"]")?;

    out.write_all(b",\"messages\":[")?;
    let mut written = 0u64;
    let mut cursor: Option<i64> = None;
    while let Some(ts) = next_bucket_ts(stores, cursor)? {
        abort.check()?;
        cursor = Some(ts);

        // first-processed wins within the bucket, in source order
        let mut seen: HashSet<(String, u64)> = HashSet::new();
        for store in stores {
            for msg in store.messages_at(ts)? {
                let key = (msg.sender_platform_id.clone(), content_chars(&msg.content));
                if !seen.insert(key) {
                    continue;
                }
                if written > 0 {
                    out.write_all(b",")?;
                }
                let export = ExportMessage {
                    sender: msg.sender_platform_id,
                    account_name: msg.account_name,
                    group_nickname: msg.group_nickname,
                    timestamp: msg.timestamp,
                    msg_type: msg.msg_type,
                    content: msg.content,
                };
                serde_json::to_writer(&mut out, &export)?;
                written += 1;
            }
        }
    }
    out.write_all(b"]}")?;
    out.flush()?;
    Ok(written)
}
