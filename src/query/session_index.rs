//! Session-index builder: contiguous message runs split by an
//! inter-message gap threshold.
//!
//! The index is built on demand, persisted next to the messages, and
//! invalidated whenever the message set changes (insert, member
//! delete). Rebuilds replace the previous index atomically: delete and
//! re-insert happen in one transaction together with the recorded
//! threshold.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use crate::store::SessionStore;

pub const DEFAULT_GAP_SECONDS: i64 = 1800;

const THRESHOLD_KEY: &str = "gap_threshold";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: i64,
    pub start_ts: i64,
    pub end_ts: i64,
    pub message_count: u64,
    pub first_message_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub entry_count: u64,
    pub gap_threshold: i64,
    pub total_messages: u64,
    pub average_length: f64,
    pub longest: u64,
}

pub fn has_index(store: &SessionStore) -> Result<bool> {
    let n: i64 = store
        .conn()
        .query_row("SELECT COUNT(*) FROM session_index", [], |row| row.get(0))?;
    Ok(n > 0)
}

/// The threshold recorded by the last build, or the default.
pub fn stored_threshold(store: &SessionStore) -> Result<i64> {
    let value: Option<String> = store
        .conn()
        .query_row(
            "SELECT value FROM session_index_meta WHERE key = ?1",
            params![THRESHOLD_KEY],
            |row| row.get(0),
        )
        .ok();
    Ok(value
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_GAP_SECONDS))
}

/// Record a new threshold without rebuilding; the next explicit
/// `generate` picks it up.
pub fn set_threshold(store: &SessionStore, gap_seconds: i64) -> Result<()> {
    store.conn().execute(
        "INSERT OR REPLACE INTO session_index_meta (key, value) VALUES (?1, ?2)",
        params![THRESHOLD_KEY, gap_seconds.to_string()],
    )?;
    Ok(())
}

/// Rebuild the index: scan messages in timestamp order and open a new
/// entry whenever the inter-message gap exceeds the threshold.
pub fn generate(store: &SessionStore, gap_seconds: i64) -> Result<IndexStats> {
    store.begin()?;
    let result = (|| -> Result<IndexStats> {
        store.conn().execute("DELETE FROM session_index", [])?;
        store.conn().execute(
            "INSERT OR REPLACE INTO session_index_meta (key, value) VALUES (?1, ?2)",
            params![THRESHOLD_KEY, gap_seconds.to_string()],
        )?;

        let mut insert = store.conn().prepare(
            "INSERT INTO session_index (start_ts, end_ts, message_count, first_message_id)
             VALUES (?1, ?2, ?3, ?4)",
        )?;

        let mut scan = store
            .conn()
            .prepare("SELECT id, ts FROM message ORDER BY ts, id")?;
        let rows = scan.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut current: Option<(i64, i64, i64, u64)> = None; // (first_id, start, last, count)
        let mut entry_count = 0u64;
        let mut total = 0u64;
        let mut longest = 0u64;

        for row in rows {
            let (id, ts) = row?;
            total += 1;
            match current.as_mut() {
                Some((_, _, last, count)) if ts - *last <= gap_seconds => {
                    *last = ts;
                    *count += 1;
                }
                _ => {
                    if let Some((first_id, start, last, count)) = current.take() {
                        insert.execute(params![start, last, count as i64, first_id])?;
                        entry_count += 1;
                        longest = longest.max(count);
                    }
                    current = Some((id, ts, ts, 1));
                }
            }
        }
        if let Some((first_id, start, last, count)) = current.take() {
            insert.execute(params![start, last, count as i64, first_id])?;
            entry_count += 1;
            longest = longest.max(count);
        }

        Ok(IndexStats {
            entry_count,
            gap_threshold: gap_seconds,
            total_messages: total,
            average_length: if entry_count > 0 {
                (total as f64 / entry_count as f64 * 100.0).round() / 100.0
            } else {
                0.0
            },
            longest,
        })
    })();

    match result {
        Ok(stats) => {
            store.commit()?;
            Ok(stats)
        }
        Err(e) => {
            let _ = store.rollback();
            Err(e)
        }
    }
}

/// Current index statistics without rebuilding.
pub fn stats(store: &SessionStore) -> Result<Option<IndexStats>> {
    if !has_index(store)? {
        return Ok(None);
    }
    let (entry_count, total, longest): (i64, i64, i64) = store.conn().query_row(
        "SELECT COUNT(*), COALESCE(SUM(message_count), 0), COALESCE(MAX(message_count), 0)
         FROM session_index",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(Some(IndexStats {
        entry_count: entry_count as u64,
        gap_threshold: stored_threshold(store)?,
        total_messages: total as u64,
        average_length: if entry_count > 0 {
            (total as f64 / entry_count as f64 * 100.0).round() / 100.0
        } else {
            0.0
        },
        longest: longest as u64,
    }))
}

/// All index entries in order.
pub fn entries(store: &SessionStore) -> Result<Vec<IndexEntry>> {
    let mut stmt = store.conn().prepare(
        "SELECT id, start_ts, end_ts, message_count, first_message_id
         FROM session_index ORDER BY start_ts, id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(IndexEntry {
            id: row.get(0)?,
            start_ts: row.get(1)?,
            end_ts: row.get(2)?,
            message_count: row.get::<_, i64>(3)? as u64,
            first_message_id: row.get(4)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}
