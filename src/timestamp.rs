//! Swift-style timestamps: seconds since the epoch as a decimal string
//! with five fractional digits, zero padded to sixteen characters.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Current time in seconds.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `1234.5` -> `"0000001234.50000"`.
pub fn normalize(ts: f64) -> String {
    format!("{ts:016.5}")
}

/// Parse a timestamp string.  Accepts anything `f64` parses, which covers
/// normalized and raw forms.
pub fn parse(text: &str) -> Option<f64> {
    let value = text.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Normalize a timestamp string; `None` when it does not parse.
pub fn normalize_str(text: &str) -> Option<String> {
    parse(text).map(normalize)
}

/// Modification time of `meta` in seconds, nanoseconds included.
pub fn mtime_of(meta: &fs::Metadata) -> f64 {
    meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9
}

fn to_datetime(ts: f64) -> DateTime<Utc> {
    let secs = ts.trunc() as i64;
    let nanos = ((ts.fract()) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// `2024-01-02T03:04:05.678900`, the listing `last_modified` format.
pub fn iso8601(ts: f64) -> String {
    to_datetime(ts).format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// RFC 7231 date for `Last-Modified`, rounded up to the next whole second
/// the way the object server does it.
pub fn http_date(ts: f64) -> String {
    let secs = ts.ceil().max(0.0) as u64;
    httpdate::fmt_http_date(UNIX_EPOCH + std::time::Duration::from_secs(secs))
}

/// Parse an HTTP date into seconds.
pub fn parse_http_date(text: &str) -> Option<f64> {
    let time = httpdate::parse_http_date(text).ok()?;
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(1234.5), "0000001234.50000");
        assert_eq!(normalize(1_700_000_000.123456), "1700000000.12346");
        assert_eq!(normalize(0.0), "0000000000.00000");
    }

    #[test]
    fn test_normalize_str() {
        assert_eq!(normalize_str("1700000000").as_deref(), Some("1700000000.00000"));
        assert_eq!(normalize_str("0000001234.50000").as_deref(), Some("0000001234.50000"));
        assert_eq!(normalize_str("soon"), None);
        assert_eq!(normalize_str("-1"), None);
    }

    #[test]
    fn test_iso8601() {
        assert_eq!(iso8601(0.5), "1970-01-01T00:00:00.500000");
        assert_eq!(iso8601(1_704_164_645.0), "2024-01-02T03:04:05.000000");
    }

    #[test]
    fn test_http_date_rounds_up() {
        assert_eq!(http_date(0.2), "Thu, 01 Jan 1970 00:00:01 GMT");
        assert_eq!(parse_http_date("Thu, 01 Jan 1970 00:00:01 GMT"), Some(1.0));
    }
}
