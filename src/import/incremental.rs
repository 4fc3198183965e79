//! Incremental import: add a new source's messages to an existing
//! session without duplicating what is already there.
//!
//! The new source is parsed into a staging store first, then compared
//! against the session by the duplicate key
//! `(timestamp, sender platform id, content length)`. `analyze` reports
//! counts without writing; `import` copies the new messages, appending
//! them so session ids stay monotone in insertion order.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::import::{ImportOptions, ImportProgress, ImportStage, ProgressFn};
use crate::parse::ParseProgress;
use crate::paths::{remove_store_files, AppDirs};
use crate::query::session_index;
use crate::store::{staging, SessionStore, StagingStore};
use crate::types::RawMessage;

const SCAN_PAGE: usize = 5000;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalAnalysis {
    pub new: u64,
    pub duplicate: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalOutcome {
    pub session_id: String,
    pub added: u64,
    pub duplicate: u64,
    pub total: u64,
}

/// Duplicate key. Content length is measured in characters to match the
/// store's `LENGTH()` semantics.
fn dup_key(msg: &RawMessage) -> (i64, String, i64) {
    (
        msg.timestamp,
        msg.sender_platform_id.clone(),
        msg.content.as_deref().map(|c| c.chars().count()).unwrap_or(0) as i64,
    )
}

/// Existing `(ts, platform id, content length)` triples of a session.
fn session_keys(store: &SessionStore) -> Result<HashSet<(i64, String, i64)>> {
    let mut keys = HashSet::new();
    let mut stmt = store.conn().prepare(
        "SELECT m.ts, mem.platform_id, COALESCE(LENGTH(m.content), 0)
         FROM message m JOIN member mem ON mem.id = m.sender_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for row in rows {
        keys.insert(row?);
    }
    Ok(keys)
}

/// Count how many of the source's messages are new versus already in
/// the session. Nothing is written.
pub fn analyze(
    dirs: &AppDirs,
    session_id: &str,
    source: &Path,
    opts: &ImportOptions,
) -> Result<IncrementalAnalysis> {
    let session = SessionStore::open_read(&dirs.session_db(session_id))?;
    let staging_path = dirs.staging_db(&format!("incr_{}", uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let (staging, _) = staging::stage_source(source, &staging_path, &opts.parse_options())?;
        let existing = session_keys(&session)?;
        let (new, duplicate) = partition_counts(&staging, &existing)?;
        Ok(IncrementalAnalysis {
            new,
            duplicate,
            total: new + duplicate,
        })
    })();

    let _ = remove_store_files(&staging_path);
    result
}

fn partition_counts(
    staging: &StagingStore,
    existing: &HashSet<(i64, String, i64)>,
) -> Result<(u64, u64)> {
    let mut new = 0u64;
    let mut duplicate = 0u64;
    let mut seen: HashSet<(i64, String, i64)> = HashSet::new();
    let mut cursor = 0i64;
    loop {
        let page = staging.messages_page(cursor, SCAN_PAGE)?;
        if page.is_empty() {
            break;
        }
        for (id, msg) in &page {
            cursor = *id;
            let key = dup_key(msg);
            if existing.contains(&key) || !seen.insert(key) {
                duplicate += 1;
            } else {
                new += 1;
            }
        }
    }
    Ok((new, duplicate))
}

/// Copy the source's new messages into the session. The session index,
/// when present, is regenerated afterwards.
pub fn import(
    dirs: &AppDirs,
    session_id: &str,
    source: &Path,
    opts: &ImportOptions,
    progress: ProgressFn<'_>,
) -> Result<IncrementalOutcome> {
    let session = SessionStore::open(&dirs.session_db(session_id))?;
    let staging_path = dirs.staging_db(&format!("incr_{}", uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let (staging, summary) =
            staging::stage_source(source, &staging_path, &opts.parse_options())?;
        let mut existing = session_keys(&session)?;
        let total = staging.message_count()?;

        let mut added = 0u64;
        let mut duplicate = 0u64;
        let mut cursor = 0i64;
        let mut since_commit = 0u64;

        session.begin()?;
        let copy = (|| -> Result<()> {
            loop {
                opts.abort.check()?;
                let page = staging.messages_page(cursor, SCAN_PAGE)?;
                if page.is_empty() {
                    break;
                }
                for (id, msg) in &page {
                    cursor = *id;
                    if !existing.insert(dup_key(msg)) {
                        duplicate += 1;
                        continue;
                    }
                    let sender_id = session.ensure_member(
                        &msg.sender_platform_id,
                        &msg.account_name,
                        msg.group_nickname.as_deref(),
                    )?;
                    session.insert_message(sender_id, msg)?;
                    added += 1;
                    since_commit += 1;
                    if since_commit >= opts.commit_every.max(1) {
                        session.commit()?;
                        session.begin()?;
                        since_commit = 0;
                    }
                }
                progress(ImportProgress::at_stage(
                    ImportStage::Parse,
                    ParseProgress {
                        bytes_read: summary.bytes_read,
                        total_bytes: summary.bytes_read,
                        messages_seen: added + duplicate,
                    },
                ));
            }
            Ok(())
        })();
        match copy {
            Ok(()) => session.commit()?,
            Err(e) => {
                let _ = session.rollback();
                return Err(e);
            }
        }

        if session_index::has_index(&session)? {
            let threshold = session_index::stored_threshold(&session)?;
            session_index::generate(&session, threshold)?;
        }

        progress(ImportProgress::marker(ImportStage::Done, None));
        info!(session = %session_id, added, duplicate, "incremental import complete");
        Ok(IncrementalOutcome {
            session_id: session_id.to_string(),
            added,
            duplicate,
            total,
        })
    })();

    let _ = remove_store_files(&staging_path);
    result
}
