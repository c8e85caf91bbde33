//! Metadata key names and well-known values.

/// Base name of the extended attributes holding serialized metadata.
/// Later chunks append `1`, `2`, ...
pub const METADATA_KEY: &str = "user.swift.metadata";

pub const X_TIMESTAMP: &str = "X-Timestamp";
pub const X_PUT_TIMESTAMP: &str = "X-PUT-Timestamp";
pub const X_DELETE_AT: &str = "X-Delete-At";
pub const X_DELETE_AFTER: &str = "X-Delete-After";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const ETAG: &str = "ETag";
pub const NAME: &str = "name";
pub const X_TYPE: &str = "X-Type";
pub const X_OBJECT_TYPE: &str = "X-Object-Type";
pub const X_OBJECT_PUT_MTIME: &str = "X-Object-PUT-Mtime";
pub const X_OBJECT_COUNT: &str = "X-Object-Count";
pub const X_BYTES_USED: &str = "X-Bytes-Used";
pub const X_CONTAINER_COUNT: &str = "X-Container-Count";
pub const X_REPORTED_SYNC_POINT: &str = "X-Reported-Sync-Point";
pub const X_SYNC_POINT: &str = "X-Sync-Point";

pub const OBJECT_META_PREFIX: &str = "X-Object-Meta-";
pub const CONTAINER_META_PREFIX: &str = "X-Container-Meta-";
pub const ACCOUNT_META_PREFIX: &str = "X-Account-Meta-";

/// `X-Type` values.
pub const OBJECT: &str = "Object";
pub const CONTAINER: &str = "container";
pub const ACCOUNT: &str = "Account";

/// `X-Object-Type` values.
pub const FILE: &str = "file";
pub const DIR_NON_OBJECT: &str = "dir";
pub const DIR_OBJECT: &str = "marker_dir";

/// Content type that marks an explicit directory object.
pub const DIR_TYPE: &str = "application/directory";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Keys an object POST may not change.
pub const POST_PRESERVED_KEYS: &[&str] = &[
    CONTENT_TYPE,
    ETAG,
    NAME,
    CONTENT_LENGTH,
    X_OBJECT_TYPE,
    X_TYPE,
    X_OBJECT_PUT_MTIME,
];

/// Internal keys stripped before metadata leaves the engine.
pub const TYPING_KEYS: &[&str] = &[X_TYPE, X_OBJECT_TYPE];

/// Attribute key holding chunk `index`.
pub fn chunk_key(index: usize) -> String {
    if index == 0 {
        METADATA_KEY.to_string()
    } else {
        format!("{METADATA_KEY}{index}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key() {
        assert_eq!(chunk_key(0), "user.swift.metadata");
        assert_eq!(chunk_key(1), "user.swift.metadata1");
        assert_eq!(chunk_key(12), "user.swift.metadata12");
    }
}
