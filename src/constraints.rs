//! Request constraints applied before the engine sees a request.
//!
//! Generic object-server limits (body size, name length, metadata size,
//! expiry headers) come first, then the POSIX naming rules: every `/`
//! separated segment becomes a directory or file name on disk.

use axum::http::HeaderMap;

use crate::config::ConstraintsConfig;
use crate::errors::SwiftError;
use crate::metadata::keys::{DIR_TYPE, X_DELETE_AFTER, X_DELETE_AT};
use crate::timestamp;

/// Room kept in the final segment for the `.<name>.<32 hex>` temp name.
pub const TEMP_SUFFIX_RESERVE: usize = 34;

/// Headers naming features this store does not implement.
pub const UNSUPPORTED_HEADERS: &[&str] = &[
    "x-object-manifest",
    "x-static-large-object",
    "x-versions-location",
];

/// Why one path segment is unusable, or `None` when it is fine.
pub fn validate_component(component: &str, max_len: usize) -> Option<String> {
    if component.is_empty() {
        return Some("cannot begin, end, or have contiguous /'s".to_string());
    }
    if component.len() > max_len {
        return Some(format!("too long ({})", component.len()));
    }
    if component == "." || component == ".." {
        return Some("cannot be . or ..".to_string());
    }
    None
}

/// Check `name` against the POSIX rules and return the name to store.
///
/// A trailing `/` is only allowed on directory objects and is removed.
pub fn check_object_name(
    name: &str,
    content_type: Option<&str>,
    config: &ConstraintsConfig,
) -> Result<String, SwiftError> {
    let normalized = match name.strip_suffix('/') {
        Some(stripped) if content_type == Some(DIR_TYPE) => stripped,
        _ => name,
    };
    let component_max = config.max_object_name_component_length;
    let last_max = component_max.saturating_sub(TEMP_SUFFIX_RESERVE);

    let segments: Vec<&str> = normalized.split('/').collect();
    let last = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        let max = if index == last { last_max } else { component_max };
        if let Some(reason) = validate_component(segment, max) {
            return Err(SwiftError::bad_request(format!(
                "Invalid object name \"{name}\", component \"{segment}\" {reason}"
            )));
        }
    }
    Ok(normalized.to_string())
}

pub fn check_container_name(name: &str, config: &ConstraintsConfig) -> Result<(), SwiftError> {
    if name.is_empty() {
        return Err(SwiftError::bad_request("Container name cannot be empty"));
    }
    if name.contains('/') {
        return Err(SwiftError::bad_request("Container name cannot contain slashes"));
    }
    if name.len() > config.max_container_name_length {
        return Err(SwiftError::bad_request(format!(
            "Container name length of {} longer than {}",
            name.len(),
            config.max_container_name_length
        )));
    }
    Ok(())
}

/// Check user metadata headers carrying `prefix` (`X-Object-Meta-` etc).
pub fn check_metadata(
    headers: &HeaderMap,
    prefix: &str,
    config: &ConstraintsConfig,
) -> Result<(), SwiftError> {
    let prefix = prefix.to_ascii_lowercase();
    let mut count = 0;
    let mut size = 0;
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(prefix.as_str()) else {
            continue;
        };
        let value = value.as_bytes();
        if key.is_empty() {
            return Err(SwiftError::bad_request("Metadata name cannot be empty"));
        }
        count += 1;
        size += key.len() + value.len();
        if key.len() > config.max_meta_name_length {
            return Err(SwiftError::bad_request(format!(
                "Metadata name too long: {}{key}",
                prefix
            )));
        }
        if value.len() > config.max_meta_value_length {
            return Err(SwiftError::bad_request(format!(
                "Metadata value longer than {}: {}{key}",
                config.max_meta_value_length, prefix
            )));
        }
        if count > config.max_meta_count {
            return Err(SwiftError::bad_request(format!(
                "Too many metadata items; max {}",
                config.max_meta_count
            )));
        }
        if size > config.max_meta_overall_size {
            return Err(SwiftError::bad_request(format!(
                "Total metadata too large; max {}",
                config.max_meta_overall_size
            )));
        }
    }
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absolute expiry from `X-Delete-At` or `X-Delete-After`, as an integer
/// string.  `X-Delete-After` wins when both are sent.
pub fn delete_at_from_headers(headers: &HeaderMap) -> Result<Option<String>, SwiftError> {
    if let Some(after) = header_str(headers, X_DELETE_AFTER) {
        let after: i64 = after
            .trim()
            .parse()
            .map_err(|_| SwiftError::bad_request("Non-integer X-Delete-After"))?;
        if after < 0 {
            return Err(SwiftError::bad_request("X-Delete-After in past"));
        }
        let at = timestamp::now() as i64 + after;
        return Ok(Some(at.to_string()));
    }
    if let Some(at) = header_str(headers, X_DELETE_AT) {
        let at: i64 = at
            .trim()
            .parse()
            .map_err(|_| SwiftError::bad_request("Non-integer X-Delete-At"))?;
        return Ok(Some(at.to_string()));
    }
    Ok(None)
}

/// All checks for an object PUT.  Returns the name to store under.
pub fn check_object_creation(
    headers: &HeaderMap,
    name: &str,
    config: &ConstraintsConfig,
) -> Result<String, SwiftError> {
    let chunked = header_str(headers, "transfer-encoding")
        .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
    let length = match header_str(headers, "content-length") {
        Some(value) => Some(
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| SwiftError::bad_request("Invalid Content-Length"))?,
        ),
        None => None,
    };
    if length.is_none() && !chunked {
        return Err(SwiftError::LengthRequired);
    }
    if length.is_some_and(|l| l > config.max_file_size) {
        return Err(SwiftError::RequestEntityTooLarge);
    }
    if name.len() > config.max_object_name_length {
        return Err(SwiftError::bad_request(format!(
            "Object name length of {} longer than {}",
            name.len(),
            config.max_object_name_length
        )));
    }
    check_metadata(headers, "X-Object-Meta-", config)?;
    delete_at_from_headers(headers)?;

    if !config.ignore_unsupported_headers {
        if let Some(header) = UNSUPPORTED_HEADERS.iter().find(|h| headers.contains_key(**h)) {
            return Err(SwiftError::bad_request(format!(
                "Unsupported header {header}"
            )));
        }
    }

    check_object_name(name, header_str(headers, "content-type"), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config() -> ConstraintsConfig {
        ConstraintsConfig::default()
    }

    fn put_headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("0"));
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn message(err: SwiftError) -> String {
        err.to_string()
    }

    #[test]
    fn test_contiguous_slashes() {
        for name in ["a//b", "/a", "a/"] {
            let err = check_object_name(name, Some("text/plain"), &config()).unwrap_err();
            assert!(
                message(err).contains("cannot begin, end, or have"),
                "{name}"
            );
        }
    }

    #[test]
    fn test_dot_segments() {
        let err = check_object_name("a/../b", None, &config()).unwrap_err();
        assert!(message(err).contains("cannot be . or .."));
        assert!(check_object_name(".hidden/..x", None, &config()).is_ok());
    }

    #[test]
    fn test_final_segment_limit() {
        let ok = "f".repeat(221);
        assert_eq!(check_object_name(&ok, None, &config()).unwrap(), ok);
        let long = "f".repeat(222);
        let err = check_object_name(&long, None, &config()).unwrap_err();
        assert!(message(err).contains("too long (222)"));

        // Directories may use the full component length.
        let name = format!("{}/x", "d".repeat(255));
        assert!(check_object_name(&name, None, &config()).is_ok());
        let name = format!("{}/x", "d".repeat(256));
        assert!(check_object_name(&name, None, &config()).is_err());
    }

    #[test]
    fn test_directory_trailing_slash() {
        assert_eq!(
            check_object_name("a/b/", Some(DIR_TYPE), &config()).unwrap(),
            "a/b"
        );
        assert!(check_object_name("a/b//", Some(DIR_TYPE), &config()).is_err());
    }

    #[test]
    fn test_length_required_and_too_large() {
        let err = check_object_creation(&HeaderMap::new(), "o", &config()).unwrap_err();
        assert!(matches!(err, SwiftError::LengthRequired));

        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        assert!(check_object_creation(&headers, "o", &config()).is_ok());

        let headers = put_headers(&[("content-length", "5368709123")]);
        let err = check_object_creation(&headers, "o", &config()).unwrap_err();
        assert!(matches!(err, SwiftError::RequestEntityTooLarge));
    }

    #[test]
    fn test_name_length() {
        let name = format!("{}/{}", "a".repeat(200), "b/".repeat(420)) + "c";
        assert!(name.len() > 1024);
        let err = check_object_creation(&put_headers(&[]), &name, &config()).unwrap_err();
        assert!(message(err).contains("longer than 1024"));
    }

    #[test]
    fn test_metadata_limits() {
        let long_name = format!("x-object-meta-{}", "n".repeat(129));
        let mut headers = put_headers(&[]);
        headers.insert(
            axum::http::HeaderName::from_bytes(long_name.as_bytes()).unwrap(),
            HeaderValue::from_static("v"),
        );
        assert!(check_object_creation(&headers, "o", &config()).is_err());

        let long_value = "v".repeat(257);
        let headers = put_headers(&[("x-object-meta-color", &long_value)]);
        assert!(check_object_creation(&headers, "o", &config()).is_err());

        let mut headers = put_headers(&[]);
        for i in 0..91 {
            headers.insert(
                axum::http::HeaderName::from_bytes(format!("x-object-meta-k{i}").as_bytes())
                    .unwrap(),
                HeaderValue::from_static("v"),
            );
        }
        let err = check_object_creation(&headers, "o", &config()).unwrap_err();
        assert!(message(err).contains("Too many metadata items"));

        let headers = put_headers(&[("x-object-meta-color", "blue")]);
        assert!(check_object_creation(&headers, "o", &config()).is_ok());
    }

    #[test]
    fn test_delete_headers() {
        let headers = put_headers(&[("x-delete-at", "soon")]);
        assert!(check_object_creation(&headers, "o", &config()).is_err());
        let headers = put_headers(&[("x-delete-after", "-5")]);
        assert!(check_object_creation(&headers, "o", &config()).is_err());
        // Past expiry is accepted; the object just reads as expired.
        let headers = put_headers(&[("x-delete-at", "1")]);
        assert!(check_object_creation(&headers, "o", &config()).is_ok());

        let headers = put_headers(&[("x-delete-after", "60")]);
        let at: i64 = delete_at_from_headers(&headers)
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!((at - timestamp::now() as i64 - 60).abs() <= 1);
    }

    #[test]
    fn test_unsupported_headers() {
        let headers = put_headers(&[("x-object-manifest", "c/seg")]);
        let err = check_object_creation(&headers, "o", &config()).unwrap_err();
        assert!(message(err).contains("Unsupported header"));

        let permissive = ConstraintsConfig {
            ignore_unsupported_headers: true,
            ..config()
        };
        assert!(check_object_creation(&headers, "o", &permissive).is_ok());
    }

    #[test]
    fn test_container_names() {
        assert!(check_container_name("c", &config()).is_ok());
        assert!(check_container_name("", &config()).is_err());
        assert!(check_container_name("a/b", &config()).is_err());
        assert!(check_container_name(&"c".repeat(257), &config()).is_err());
    }
}
