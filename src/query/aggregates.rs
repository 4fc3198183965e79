//! Time-series and distribution aggregates.
//!
//! Bucketing happens in the system local zone via SQLite's
//! `'unixepoch', 'localtime'` modifiers. Fixed-size distributions
//! (hour, weekday, month) materialize every bucket, zero-filled; the
//! daily trend and yearly report only carry buckets that exist.

use anyhow::Result;
use rusqlite::params_from_iter;
use serde::Serialize;

use crate::query::{filter_sql, FilterSql};
use crate::store::SessionStore;
use crate::types::QueryFilter;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberActivityRow {
    pub member_id: i64,
    pub platform_id: String,
    pub account_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_nickname: Option<String>,
    pub count: u64,
    pub percentage: f64,
}

/// Count per member, descending, with percentage of the filtered total
/// rounded to two decimals.
pub fn member_activity(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<MemberActivityRow>> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT m.sender_id, mem.platform_id, mem.account_name, mem.group_nickname, COUNT(*) AS cnt
         FROM message m JOIN member mem ON mem.id = m.sender_id
         {clause}
         GROUP BY m.sender_id
         ORDER BY cnt DESC, m.sender_id"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows: Vec<MemberActivityRow> = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(MemberActivityRow {
                member_id: row.get(0)?,
                platform_id: row.get(1)?,
                account_name: row.get(2)?,
                group_nickname: row.get(3)?,
                count: row.get::<_, i64>(4)? as u64,
                percentage: 0.0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let total: u64 = rows.iter().map(|r| r.count).sum();
    if total > 0 {
        for row in &mut rows {
            row.percentage = (row.count as f64 / total as f64 * 10000.0).round() / 100.0;
        }
    }
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRow {
    pub bucket: u32,
    pub count: u64,
}

fn fixed_buckets(
    store: &SessionStore,
    filter: &QueryFilter,
    select_expr: &str,
    bucket_range: std::ops::RangeInclusive<u32>,
    map_bucket: impl Fn(u32) -> u32,
) -> Result<Vec<BucketRow>> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT {select_expr} AS bucket, COUNT(*) FROM message m {clause} GROUP BY bucket"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let mut counts: std::collections::HashMap<u32, u64> = std::collections::HashMap::new();
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? as u64))
    })?;
    for row in rows {
        let (bucket, count) = row?;
        counts.insert(map_bucket(bucket), count);
    }
    Ok(bucket_range
        .map(|bucket| BucketRow {
            bucket,
            count: counts.get(&bucket).copied().unwrap_or(0),
        })
        .collect())
}

/// 24 buckets, local hour of day.
pub fn hourly(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<BucketRow>> {
    fixed_buckets(
        store,
        filter,
        "CAST(strftime('%H', m.ts, 'unixepoch', 'localtime') AS INTEGER)",
        0..=23,
        |b| b,
    )
}

/// 7 buckets, Mon=1 … Sun=7. SQLite's `%w` counts Sunday as zero.
pub fn weekday(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<BucketRow>> {
    fixed_buckets(
        store,
        filter,
        "CAST(strftime('%w', m.ts, 'unixepoch', 'localtime') AS INTEGER)",
        1..=7,
        |b| if b == 0 { 7 } else { b },
    )
}

/// 12 buckets, calendar month across all years.
pub fn monthly(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<BucketRow>> {
    fixed_buckets(
        store,
        filter,
        "CAST(strftime('%m', m.ts, 'unixepoch', 'localtime') AS INTEGER)",
        1..=12,
        |b| b,
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub year: i32,
    pub count: u64,
}

/// Only years with at least one message.
pub fn yearly(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<YearRow>> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT CAST(strftime('%Y', m.ts, 'unixepoch', 'localtime') AS INTEGER) AS y, COUNT(*)
         FROM message m {clause} GROUP BY y ORDER BY y"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok(YearRow {
            year: row.get::<_, i64>(0)? as i32,
            count: row.get::<_, i64>(1)? as u64,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

pub fn available_years(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<i32>> {
    Ok(yearly(store, filter)?.into_iter().map(|r| r.year).collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRow {
    pub date: String,
    pub count: u64,
}

/// One row per local calendar day present; absent days are absent.
pub fn daily(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<DayRow>> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT strftime('%Y-%m-%d', m.ts, 'unixepoch', 'localtime') AS d, COUNT(*)
         FROM message m {clause} GROUP BY d ORDER BY d"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok(DayRow {
            date: row.get(0)?,
            count: row.get::<_, i64>(1)? as u64,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthDetailRow {
    pub length: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthRangeRow {
    pub label: String,
    pub min: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthDistribution {
    pub detail: Vec<LengthDetailRow>,
    pub ranges: Vec<LengthRangeRow>,
}

const LENGTH_RANGES: &[(&str, u64, Option<u64>)] = &[
    ("1-5", 1, Some(5)),
    ("6-10", 6, Some(10)),
    ("11-20", 11, Some(20)),
    ("21-50", 21, Some(50)),
    ("51-100", 51, Some(100)),
    ("100+", 101, None),
];

/// Distribution of text lengths (characters); grouping ranges are
/// computed over the per-length detail.
pub fn length_distribution(store: &SessionStore, filter: &QueryFilter) -> Result<LengthDistribution> {
    let FilterSql { clause, params } = filter_sql_with_content(filter);
    let sql = format!(
        "SELECT LENGTH(m.content) AS len, COUNT(*) FROM message m {clause}
         GROUP BY len ORDER BY len"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let detail: Vec<LengthDetailRow> = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(LengthDetailRow {
                length: row.get::<_, i64>(0)? as u64,
                count: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let ranges = LENGTH_RANGES
        .iter()
        .map(|(label, min, max)| LengthRangeRow {
            label: (*label).to_string(),
            min: *min,
            max: *max,
            count: detail
                .iter()
                .filter(|d| d.length >= *min && max.map(|m| d.length <= m).unwrap_or(true))
                .map(|d| d.count)
                .sum(),
        })
        .collect();

    Ok(LengthDistribution { detail, ranges })
}

fn filter_sql_with_content(filter: &QueryFilter) -> FilterSql {
    crate::query::filter_sql_with(
        filter,
        true,
        &[(
            "m.content IS NOT NULL AND LENGTH(m.content) > 0".to_string(),
            Vec::new(),
        )],
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeRow {
    #[serde(rename = "type")]
    pub msg_type: i64,
    pub count: u64,
}

pub fn type_distribution(store: &SessionStore, filter: &QueryFilter) -> Result<Vec<TypeRow>> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!(
        "SELECT m.type, COUNT(*) FROM message m {clause} GROUP BY m.type ORDER BY COUNT(*) DESC"
    );
    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok(TypeRow {
            msg_type: row.get(0)?,
            count: row.get::<_, i64>(1)? as u64,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub min_ts: i64,
    pub max_ts: i64,
}

/// `(min ts, max ts)` of the filtered set, or `None` when empty.
pub fn time_range(store: &SessionStore, filter: &QueryFilter) -> Result<Option<TimeRange>> {
    let FilterSql { clause, params } = filter_sql(filter, false);
    let sql = format!("SELECT MIN(m.ts), MAX(m.ts) FROM message m {clause}");
    let (min, max): (Option<i64>, Option<i64>) = store.conn().query_row(
        &sql,
        params_from_iter(params.iter()),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(match (min, max) {
        (Some(min_ts), Some(max_ts)) => Some(TimeRange { min_ts, max_ts }),
        _ => None,
    })
}

/// Total filtered, non-system message count. Anchor for the bucket-sum
/// invariants.
pub fn count(store: &SessionStore, filter: &QueryFilter) -> Result<u64> {
    let FilterSql { clause, params } = filter_sql(filter, true);
    let sql = format!("SELECT COUNT(*) FROM message m {clause}");
    let n: i64 = store
        .conn()
        .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(n as u64)
}
