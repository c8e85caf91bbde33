//! Request parsing and response helpers shared by the Swift handlers.

use std::collections::HashMap;

use axum::http::header::HeaderName;
use axum::http::{HeaderMap, HeaderValue};
use serde_json::json;
use tracing::debug;

use crate::errors::SwiftError;
use crate::metadata::{self, Metadata};
use crate::storage::backend::{ContainerRow, ListParams, ListingEntry, ObjectRow};
use crate::timestamp;
use crate::AppState;

// -- Placement ----------------------------------------------------------------

/// Device holding `account`, or 404 when the ring has none.
pub fn resolve_device(
    state: &AppState,
    account: &str,
    container: Option<&str>,
    obj: Option<&str>,
) -> Result<String, SwiftError> {
    let (part, nodes) = state.ring.get_nodes(account, container, obj);
    match nodes.into_iter().next() {
        Some(node) if !node.is_not_in_ring() => {
            debug!(account, part, device = %node.device, "resolved account");
            Ok(node.device)
        }
        _ => {
            debug!(account, "account has no device in the ring");
            Err(SwiftError::NotFound)
        }
    }
}

// -- Query strings ------------------------------------------------------------

/// Parse a raw query string into a map.  `+` is a space, as in forms.
pub fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let decode = |s: &str| {
        let s = s.replace('+', " ");
        percent_encoding::percent_decode_str(&s)
            .decode_utf8_lossy()
            .into_owned()
    };
    let mut map = HashMap::new();
    for part in raw.unwrap_or_default().split('&') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => map.insert(decode(k), decode(v)),
            None => map.insert(decode(part), String::new()),
        };
    }
    map
}

/// Listing query parameters.  `limit` above `max_limit` and delimiters
/// longer than one character are rejected with 412.
pub fn parse_list_params(
    query: &HashMap<String, String>,
    max_limit: usize,
) -> Result<ListParams, SwiftError> {
    let limit = match query.get("limit") {
        Some(raw) => {
            let limit: usize = raw.trim().parse().map_err(|_| {
                SwiftError::precondition_failed("Value of limit must be a positive integer")
            })?;
            if limit > max_limit {
                return Err(SwiftError::precondition_failed(format!(
                    "Maximum limit is {max_limit}"
                )));
            }
            limit
        }
        None => max_limit,
    };

    let delimiter = match query.get("delimiter").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => return Err(SwiftError::precondition_failed("Bad delimiter")),
            }
        }
    };

    let non_empty = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();
    Ok(ListParams {
        prefix: non_empty("prefix"),
        delimiter,
        marker: non_empty("marker"),
        end_marker: non_empty("end_marker"),
        path: query.get("path").cloned(),
        limit,
    })
}

/// Response encoding of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    Plain,
    Json,
    Xml,
}

impl ListingFormat {
    /// `format=` wins over `Accept`.
    pub fn select(query: &HashMap<String, String>, headers: &HeaderMap) -> Self {
        if let Some(format) = query.get("format") {
            return match format.to_ascii_lowercase().as_str() {
                "json" => ListingFormat::Json,
                "xml" => ListingFormat::Xml,
                _ => ListingFormat::Plain,
            };
        }
        let accept = header_str(headers, "accept").unwrap_or_default();
        if accept.contains("application/json") {
            ListingFormat::Json
        } else if accept.contains("application/xml") || accept.contains("text/xml") {
            ListingFormat::Xml
        } else {
            ListingFormat::Plain
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ListingFormat::Plain => "text/plain; charset=utf-8",
            ListingFormat::Json => "application/json; charset=utf-8",
            ListingFormat::Xml => "application/xml; charset=utf-8",
        }
    }
}

/// One name per line.
pub fn plain_listing<T: AsRef<str>>(rows: &[ListingEntry<T>]) -> String {
    rows.iter().map(|row| format!("{}\n", row.name())).collect()
}

pub fn json_object_listing(rows: &[ListingEntry<ObjectRow>]) -> String {
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| match row {
            ListingEntry::Item(object) => json!({
                "name": object.name,
                "hash": object.etag,
                "bytes": object.size,
                "content_type": object.content_type,
                "last_modified": timestamp::parse(&object.timestamp)
                    .map(timestamp::iso8601)
                    .unwrap_or_default(),
            }),
            ListingEntry::Subdir(name) => json!({ "subdir": name }),
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

pub fn json_account_listing(rows: &[ListingEntry<ContainerRow>]) -> String {
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| match row {
            ListingEntry::Item(container) => json!({
                "name": container.name,
                "count": container.object_count,
                "bytes": container.bytes_used,
            }),
            ListingEntry::Subdir(name) => json!({ "subdir": name }),
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

// -- Headers ------------------------------------------------------------------

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `x-object-meta-color` -> `X-Object-Meta-Color`.
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Request headers starting with `prefix`, keyed by their title-cased
/// names.
pub fn metadata_from_headers(headers: &HeaderMap, prefix: &str) -> Metadata {
    let prefix = prefix.to_ascii_lowercase();
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with(prefix.as_str()))
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((title_case(name.as_str()), value.trim().to_string()))
        })
        .collect()
}

/// `X-Timestamp` from the request, or now.
pub fn request_timestamp(headers: &HeaderMap) -> Result<f64, SwiftError> {
    match header_str(headers, "x-timestamp") {
        Some(raw) => timestamp::parse(raw).ok_or_else(|| {
            SwiftError::bad_request("X-Timestamp should be a UNIX timestamp float value")
        }),
        None => Ok(timestamp::now()),
    }
}

/// Insert a header, silently dropping names or values HTTP cannot carry.
pub fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}

/// Copy user metadata with `prefix` into response headers.
pub fn set_user_metadata(headers: &mut HeaderMap, metadata: &Metadata, prefix: &str) {
    for (key, value) in metadata::user_metadata(metadata, prefix) {
        set_header(headers, key, value);
    }
}

// -- Ranges -------------------------------------------------------------------

/// Parsed byte range from a Range header.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteRange {
    /// bytes=start-end (inclusive both ends)
    StartEnd(u64, u64),
    /// bytes=start-
    StartOpen(u64),
    /// bytes=-N (last N bytes)
    Suffix(u64),
}

/// Parse a single `bytes=` range.  Multi-range and malformed values yield
/// `None` and the whole object is served.
pub fn parse_range_header(range_str: &str) -> Option<ByteRange> {
    let spec = range_str.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        let n: u64 = suffix.parse().ok()?;
        Some(ByteRange::Suffix(n))
    } else if let Some(stripped) = spec.strip_suffix('-') {
        let start: u64 = stripped.parse().ok()?;
        Some(ByteRange::StartOpen(start))
    } else {
        let (start_s, end_s) = spec.split_once('-')?;
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = end_s.parse().ok()?;
        if start > end {
            return None;
        }
        Some(ByteRange::StartEnd(start, end))
    }
}

/// Resolve against the object size.  Returns inclusive `(start, end)`, or
/// `None` when unsatisfiable.
pub fn resolve_range(range: &ByteRange, total: u64) -> Option<(u64, u64)> {
    if total == 0 {
        return None;
    }
    match *range {
        ByteRange::StartEnd(start, end) => {
            (start < total).then(|| (start, end.min(total - 1)))
        }
        ByteRange::StartOpen(start) => (start < total).then(|| (start, total - 1)),
        ByteRange::Suffix(0) => None,
        ByteRange::Suffix(n) => Some((total.saturating_sub(n), total - 1)),
    }
}

// -- Conditional requests -----------------------------------------------------

fn strip_etag_quotes(etag: &str) -> &str {
    let etag = etag.trim();
    etag.strip_prefix('"')
        .and_then(|e| e.strip_suffix('"'))
        .unwrap_or(etag)
}

fn etag_listed(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(strip_etag_quotes)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// Evaluate `If-Match`, `If-None-Match`, `If-Unmodified-Since` and
/// `If-Modified-Since` against an object's etag and timestamp.
///
/// Order: If-Match (412), If-Unmodified-Since (412, only without
/// If-Match), If-None-Match (304), If-Modified-Since (304, only without
/// If-None-Match).
pub fn evaluate_conditions(
    headers: &HeaderMap,
    etag: &str,
    last_modified: f64,
) -> Result<(), SwiftError> {
    // Compared at whole-second granularity, like the Last-Modified header.
    let modified = last_modified.ceil();

    if let Some(if_match) = header_str(headers, "if-match") {
        if !etag_listed(if_match, etag) {
            return Err(SwiftError::precondition_failed("If-Match did not match"));
        }
    } else if let Some(since) =
        header_str(headers, "if-unmodified-since").and_then(timestamp::parse_http_date)
    {
        if modified > since {
            return Err(SwiftError::precondition_failed(
                "Object modified since If-Unmodified-Since",
            ));
        }
    }

    if let Some(if_none_match) = header_str(headers, "if-none-match") {
        if etag_listed(if_none_match, etag) {
            return Err(SwiftError::NotModified {
                etag: etag.to_string(),
            });
        }
    } else if let Some(since) =
        header_str(headers, "if-modified-since").and_then(timestamp::parse_http_date)
    {
        if modified <= since {
            return Err(SwiftError::NotModified {
                etag: etag.to_string(),
            });
        }
    }
    Ok(())
}
