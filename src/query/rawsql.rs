//! Raw SQL convenience surface.
//!
//! User-supplied queries run on a dedicated read-only connection and
//! are bounded twice: a row cap applied while iterating and a
//! wall-clock timeout enforced through SQLite's interrupt handle from a
//! watchdog thread.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub truncated: bool,
}

/// Execute a read-only statement against a store file.
pub fn execute(
    db_path: &Path,
    sql: &str,
    row_limit: usize,
    timeout: Duration,
) -> Result<SqlResult> {
    validate_read_only(sql)?;

    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|_| CoreError::NotFound(db_path.display().to_string()))?;

    let done = Arc::new(AtomicBool::new(false));
    let watchdog_done = done.clone();
    let interrupt = conn.get_interrupt_handle();
    let watchdog = std::thread::spawn(move || {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if watchdog_done.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        if !watchdog_done.load(Ordering::SeqCst) {
            interrupt.interrupt();
        }
    });

    let result = run_query(&conn, sql, row_limit);
    done.store(true, Ordering::SeqCst);
    let _ = watchdog.join();

    result.map_err(|e| match e.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(inner, _))
            if inner.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            CoreError::Sql("query timed out".into()).into()
        }
        _ => match e.downcast_ref::<CoreError>() {
            Some(_) => e,
            None => CoreError::Sql(format!("{e:#}")).into(),
        },
    })
}

fn run_query(conn: &Connection, sql: &str, row_limit: usize) -> Result<SqlResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = columns.len();

    let mut rows_out: Vec<serde_json::Value> = Vec::new();
    let mut truncated = false;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        if rows_out.len() >= row_limit {
            truncated = true;
            break;
        }
        let mut obj = serde_json::Map::new();
        for i in 0..column_count {
            let value: rusqlite::types::Value = row.get(i)?;
            obj.insert(columns[i].clone(), sqlite_value_to_json(value));
        }
        rows_out.push(serde_json::Value::Object(obj));
    }

    Ok(SqlResult {
        columns,
        rows: rows_out,
        truncated,
    })
}

pub fn sqlite_value_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(n) => serde_json::Value::Number(n.into()),
        Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(_) => serde_json::Value::Null,
    }
}

/// Reject anything but a single SELECT/WITH statement. The read-only
/// connection is the hard backstop; this check produces the friendlier
/// error.
fn validate_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Sql("empty statement".into()).into());
    }
    let upper = trimmed.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(CoreError::Sql("only SELECT statements are allowed".into()).into());
    }
    if trimmed.trim_end_matches(';').contains(';') {
        return Err(CoreError::Sql("multiple statements are not allowed".into()).into());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub sql: Option<String>,
    pub columns: Vec<ColumnInfo>,
}

/// Table layout of a store, for the SQL console.
pub fn schema(conn: &Connection) -> Result<Vec<TableInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables: Vec<(String, Option<String>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for (name, sql) in tables {
        let mut info = conn.prepare(&format!("PRAGMA table_info({name})"))?;
        let columns = info
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    column_type: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.push(TableInfo { name, sql, columns });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_writes_and_multiple_statements() {
        assert!(validate_read_only("DELETE FROM message").is_err());
        assert!(validate_read_only("SELECT 1; DROP TABLE message").is_err());
        assert!(validate_read_only("  select count(*) from message ").is_ok());
        assert!(validate_read_only("WITH t AS (SELECT 1) SELECT * FROM t;").is_ok());
    }
}
