//! Timestamp parsing for candle sources.
//!
//! Formats are tried in order:
//! 1. RFC 3339 (`2024-01-01T00:00:00Z`, `2024-01-01T00:00:00+02:00`)
//! 2. Unix milliseconds (`1704067200000`)
//! 3. `YYYY-MM-DD HH:MM:SS`
//! 4. `YYYY-MM-DDTHH:MM:SS` with an optional `±HH`/`±HHMM` offset
//! 5. `YYYY-MM-DD` (midnight UTC)

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    if is_integer(s) {
        return s
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%#z") {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}
