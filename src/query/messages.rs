//! Message retrieval: cursor paging, keyword search, context windows.

use anyhow::Result;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::query::{escape_like, filter_sql_with};
use crate::store::SessionStore;
use crate::types::{MessageRow, QueryFilter};

pub const DEFAULT_PAGE: usize = 50;

/// Paging direction relative to a message-id cursor.
#[derive(Debug, Clone, Copy)]
pub enum Cursor {
    /// Rows with id strictly less than the cursor (or the newest rows).
    Before(Option<i64>),
    /// Rows with id strictly greater than the cursor.
    After(i64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedMessages {
    pub messages: Vec<MessageRow>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchSpec {
    pub filter: QueryFilter,
    /// Keyword OR-group matched against content.
    pub keywords: Vec<String>,
    pub sender_id: Option<i64>,
    pub limit: Option<usize>,
}

fn search_conditions(spec: &SearchSpec) -> Vec<(String, Vec<Value>)> {
    let mut extra = Vec::new();
    if let Some(sender) = spec.sender_id {
        extra.push(("m.sender_id = ?".to_string(), vec![Value::Integer(sender)]));
    }
    let keywords: Vec<&String> = spec.keywords.iter().filter(|k| !k.is_empty()).collect();
    if !keywords.is_empty() {
        let ors = vec!["m.content LIKE ? ESCAPE '\\'"; keywords.len()].join(" OR ");
        let values = keywords
            .iter()
            .map(|k| Value::Text(format!("%{}%", escape_like(k))))
            .collect();
        extra.push((format!("({ors})"), values));
    }
    extra
}

fn row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        account_name: row.get(2)?,
        group_nickname: row.get(3)?,
        timestamp: row.get(4)?,
        msg_type: row.get(5)?,
        content: row.get(6)?,
    })
}

const ROW_COLUMNS: &str =
    "m.id, m.sender_id, m.sender_account_name, m.sender_group_nickname, m.ts, m.type, m.content";

/// One page relative to a cursor. `hasMore` is computed by fetching one
/// row past the requested window. Rows always come back id-ascending.
pub fn page(
    store: &SessionStore,
    spec: &SearchSpec,
    cursor: Cursor,
    limit: usize,
) -> Result<PagedMessages> {
    let limit = limit.max(1);
    let mut extra = search_conditions(spec);
    let (order, descending) = match cursor {
        Cursor::Before(Some(id)) => {
            extra.push(("m.id < ?".to_string(), vec![Value::Integer(id)]));
            ("ORDER BY m.id DESC", true)
        }
        Cursor::Before(None) => ("ORDER BY m.id DESC", true),
        Cursor::After(id) => {
            extra.push(("m.id > ?".to_string(), vec![Value::Integer(id)]));
            ("ORDER BY m.id ASC", false)
        }
    };
    let filt = filter_sql_with(&spec.filter, false, &extra);
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM message m {} {order} LIMIT {}",
        filt.clause,
        limit + 1
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let mut messages: Vec<MessageRow> = stmt
        .query_map(params_from_iter(filt.params.iter()), row_mapper)?
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = messages.len() > limit;
    messages.truncate(limit);
    if descending {
        messages.reverse();
    }
    Ok(PagedMessages { messages, has_more })
}

/// Latest rows under the filter.
pub fn recent(store: &SessionStore, spec: &SearchSpec, limit: usize) -> Result<PagedMessages> {
    page(store, spec, Cursor::Before(None), limit)
}

/// Keyword search, newest first window by default.
pub fn search(store: &SessionStore, spec: &SearchSpec) -> Result<PagedMessages> {
    let limit = spec.limit.unwrap_or(DEFAULT_PAGE);
    page(store, spec, Cursor::Before(None), limit)
}

/// Rows inside `[start_ts, end_ts]`, id-ascending, capped.
pub fn between(
    store: &SessionStore,
    filter: &QueryFilter,
    start_ts: i64,
    end_ts: i64,
    limit: usize,
) -> Result<Vec<MessageRow>> {
    let mut narrowed = filter.clone();
    narrowed.start_ts = Some(narrowed.start_ts.map_or(start_ts, |s| s.max(start_ts)));
    narrowed.end_ts = Some(narrowed.end_ts.map_or(end_ts, |e| e.min(end_ts)));
    let filt = filter_sql_with(&narrowed, false, &[]);
    let sql = format!(
        "SELECT {ROW_COLUMNS} FROM message m {} ORDER BY m.id LIMIT {}",
        filt.clause,
        limit.max(1)
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(filt.params.iter()), row_mapper)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Union of `[id−k, id+k]` windows around each seed id, deduplicated
/// and id-ordered.
pub fn context(store: &SessionStore, seed_ids: &[i64], k: i64) -> Result<Vec<MessageRow>> {
    if seed_ids.is_empty() {
        return Ok(Vec::new());
    }
    let k = k.max(0);
    let mut ranges: Vec<(i64, i64)> = seed_ids
        .iter()
        .map(|&id| (id.saturating_sub(k), id.saturating_add(k)))
        .collect();
    ranges.sort_unstable();
    // coalesce overlapping windows so each row is fetched once
    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (lo, hi) in ranges {
        match merged.last_mut() {
            Some((_, last_hi)) if lo <= *last_hi + 1 => *last_hi = (*last_hi).max(hi),
            _ => merged.push((lo, hi)),
        }
    }

    let mut out: Vec<MessageRow> = Vec::new();
    let mut stmt = store.conn().prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM message m WHERE m.id >= ?1 AND m.id <= ?2 ORDER BY m.id"
    ))?;
    for (lo, hi) in merged {
        let rows = stmt.query_map(rusqlite::params![lo, hi], row_mapper)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextualMatch {
    pub matched_id: i64,
    pub messages: Vec<MessageRow>,
}

/// Search matches, each wrapped in its ±k context window.
pub fn filter_with_context(
    store: &SessionStore,
    spec: &SearchSpec,
    k: i64,
) -> Result<Vec<ContextualMatch>> {
    let matches = search(store, spec)?;
    matches
        .messages
        .iter()
        .map(|m| {
            Ok(ContextualMatch {
                matched_id: m.id,
                messages: context(store, &[m.id], k)?,
            })
        })
        .collect()
}
