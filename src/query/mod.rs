//! Read-only query layer over a session store.
//!
//! Every operation takes the uniform `(startTs?, endTs?, memberId?)`
//! filter, composed conjunctively. Human-facing aggregates additionally
//! exclude the platform system author. All SQL goes through the filter
//! builder here so boundary semantics (`startTs ≤ ts ≤ endTs`) stay
//! consistent across operations.

pub mod aggregates;
pub mod behavior;
pub mod messages;
pub mod rawsql;
pub mod session_index;

use rusqlite::types::Value;

use crate::types::{QueryFilter, SYSTEM_AUTHOR};

/// A composed WHERE fragment with its bind values. `clause` is either
/// empty or starts with `WHERE `; extra conditions are already joined
/// with AND.
pub struct FilterSql {
    pub clause: String,
    pub params: Vec<Value>,
}

/// Build the WHERE fragment for the message table aliased as `m`.
pub fn filter_sql(filter: &QueryFilter, exclude_system: bool) -> FilterSql {
    filter_sql_with(filter, exclude_system, &[])
}

/// Same, with caller-provided extra conditions (already bound to `m`).
pub fn filter_sql_with(
    filter: &QueryFilter,
    exclude_system: bool,
    extra: &[(String, Vec<Value>)],
) -> FilterSql {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(start) = filter.start_ts {
        conditions.push("m.ts >= ?".into());
        params.push(Value::Integer(start));
    }
    if let Some(end) = filter.end_ts {
        conditions.push("m.ts <= ?".into());
        params.push(Value::Integer(end));
    }
    if let Some(member) = filter.member_id {
        conditions.push("m.sender_id = ?".into());
        params.push(Value::Integer(member));
    }
    if exclude_system {
        conditions.push("m.sender_account_name != ?".into());
        params.push(Value::Text(SYSTEM_AUTHOR.to_string()));
    }
    for (cond, values) in extra {
        conditions.push(cond.clone());
        params.extend(values.iter().cloned());
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    FilterSql { clause, params }
}

/// Escape `%`/`_`/`\` for a LIKE pattern bound with `ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || c == '_' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
