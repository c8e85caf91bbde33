//! Shape checks for stored metadata documents.
//!
//! A document that fails validation is not an error: the caller treats it
//! as stale and regenerates it from what is on disk.

use std::fs;

use super::keys::*;
use super::Metadata;
use crate::timestamp;

fn has_all(metadata: &Metadata, required: &[&str]) -> bool {
    required.iter().all(|k| metadata.contains_key(*k))
}

fn type_is(metadata: &Metadata, expected: &str) -> bool {
    metadata.get(X_TYPE).map(String::as_str) == Some(expected)
}

/// True when `metadata` describes an object and, for a regular file,
/// still matches its size and modification time.
pub fn validate_object(metadata: &Metadata, stat: Option<&fs::Metadata>) -> bool {
    if !has_all(
        metadata,
        &[X_TIMESTAMP, CONTENT_TYPE, ETAG, CONTENT_LENGTH, X_TYPE, X_OBJECT_TYPE],
    ) {
        return false;
    }
    if let Some(stat) = stat.filter(|s| s.is_file()) {
        let recorded_len = metadata
            .get(CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok());
        if recorded_len != Some(stat.len()) {
            return false;
        }
        if let Some(mtime) = metadata.get(X_OBJECT_PUT_MTIME) {
            let current = timestamp::normalize(timestamp::mtime_of(stat));
            if timestamp::normalize_str(mtime).as_deref() != Some(current.as_str()) {
                return false;
            }
        }
    }
    type_is(metadata, OBJECT)
}

pub fn validate_container(metadata: &Metadata) -> bool {
    has_all(
        metadata,
        &[X_TYPE, X_TIMESTAMP, X_PUT_TIMESTAMP, X_OBJECT_COUNT, X_BYTES_USED],
    ) && type_is(metadata, CONTAINER)
}

pub fn validate_account(metadata: &Metadata) -> bool {
    has_all(
        metadata,
        &[
            X_TYPE,
            X_TIMESTAMP,
            X_PUT_TIMESTAMP,
            X_OBJECT_COUNT,
            X_BYTES_USED,
            X_CONTAINER_COUNT,
        ],
    ) && type_is(metadata, ACCOUNT)
}

/// True when `metadata` marks an explicit directory object.
pub fn is_dir_object(metadata: &Metadata) -> bool {
    metadata.get(X_OBJECT_TYPE).map(String::as_str) == Some(DIR_OBJECT)
}
