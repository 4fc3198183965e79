//! Timestamp normalization for heterogeneous export formats.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Milliseconds start here; anything smaller is taken as seconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Accepted year window. Exports regularly contain zeroed or garbage
/// clock values; anything outside the window is dropped upstream.
const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2100;

/// Normalize a raw timestamp value to whole UTC seconds. Accepts
/// integer seconds, integer milliseconds (distinguished by magnitude),
/// and ISO-8601 strings. Returns `None` for values outside the
/// plausibility window.
pub fn normalize(value: &Value) -> Option<i64> {
    let seconds = match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            from_int(raw)?
        }
        Value::String(s) => from_str(s)?,
        _ => return None,
    };
    plausible(seconds)
}

pub fn from_int(raw: i64) -> Option<i64> {
    if raw < 0 {
        return None;
    }
    if raw >= MILLIS_THRESHOLD {
        Some(raw / 1000)
    } else {
        Some(raw)
    }
}

pub fn from_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(raw) = s.parse::<i64>() {
        return from_int(raw);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    // "YYYY-MM-DD HH:MM:SS" without an offset is read as local time.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return chrono::Local
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp());
    }
    None
}

/// Whole-seconds value whose UTC year falls inside the window.
pub fn plausible(seconds: i64) -> Option<i64> {
    if seconds < 0 {
        return None;
    }
    let year = Utc.timestamp_opt(seconds, 0).single()?.year();
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Some(seconds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seconds_pass_through() {
        assert_eq!(normalize(&json!(1_700_000_000)), Some(1_700_000_000));
    }

    #[test]
    fn milliseconds_are_scaled_down() {
        assert_eq!(normalize(&json!(1_700_000_000_123i64)), Some(1_700_000_000));
    }

    #[test]
    fn negative_and_implausible_values_drop() {
        assert_eq!(normalize(&json!(-5)), None);
        assert_eq!(normalize(&json!(100)), None); // 1970, below window
        assert_eq!(normalize(&json!(99_999_999_999i64)), None); // year 5138
    }

    #[test]
    fn iso_strings_parse() {
        assert_eq!(
            normalize(&json!("2023-11-14T22:13:20+00:00")),
            Some(1_700_000_000)
        );
    }
}
