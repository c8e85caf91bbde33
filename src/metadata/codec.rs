//! Chunked metadata storage in extended attributes.
//!
//! The serialized document is split into pieces of at most
//! [`MAX_XATTR_SIZE`] bytes stored under `user.swift.metadata`,
//! `user.swift.metadata1`, ...  A reader concatenates keys in order until a
//! piece comes back short or the next key is absent.

use std::io;

use tracing::warn;

use super::keys::chunk_key;
use super::pickle::{self, looks_pickled};
use super::Metadata;
use crate::fs::xattr::{get_xattr, remove_xattr, set_xattr, XattrTarget, MAX_XATTR_SIZE};
use crate::fs::FsError;

/// Reads and writes metadata documents.
#[derive(Debug, Clone, Copy)]
pub struct MetadataCodec {
    /// Accept legacy pickle documents on read.
    read_pickled: bool,
    chunk_size: usize,
}

impl Default for MetadataCodec {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MetadataCodec {
    pub fn new(read_pickled: bool) -> Self {
        Self {
            read_pickled,
            chunk_size: MAX_XATTR_SIZE,
        }
    }

    /// Split documents into pieces of `chunk_size` bytes instead of the
    /// attribute maximum.  Must not exceed [`MAX_XATTR_SIZE`].
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_XATTR_SIZE);
        self
    }

    /// Read the document stored on `target`.
    ///
    /// An absent document reads as empty.  A document that cannot be
    /// decoded is cleared from disk and also reads as empty, so the caller
    /// regenerates it.
    pub fn read(&self, target: XattrTarget<'_>) -> Result<Metadata, FsError> {
        let mut blob = Vec::new();
        for index in 0.. {
            let Some(chunk) = get_xattr(target, &chunk_key(index))? else {
                break;
            };
            let short = chunk.len() < self.chunk_size;
            blob.extend_from_slice(&chunk);
            if short {
                break;
            }
        }
        if blob.is_empty() {
            return Ok(Metadata::new());
        }
        match self.decode(&blob) {
            Ok(metadata) => Ok(metadata),
            Err(reason) => {
                warn!(
                    "discarding unreadable metadata on {}: {reason}",
                    target.describe().display()
                );
                self.clear(target)?;
                Ok(Metadata::new())
            }
        }
    }

    fn decode(&self, blob: &[u8]) -> Result<Metadata, String> {
        match decode_json(blob) {
            Ok(metadata) => Ok(metadata),
            Err(json_err) if self.read_pickled && looks_pickled(blob) => {
                pickle::loads_metadata(blob).map_err(|e| format!("{json_err}; {e}"))
            }
            Err(json_err) => Err(json_err),
        }
    }

    /// Replace the document stored on `target`.
    ///
    /// Out-of-space failures are logged (rate limited, naming the file)
    /// and returned as [`FsError::NoSpace`].
    pub fn write(&self, target: XattrTarget<'_>, metadata: &Metadata) -> Result<(), FsError> {
        let blob = serde_json::to_vec(metadata).map_err(|e| {
            FsError::new(
                "setxattr",
                &target.describe(),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;
        let mut written = 0;
        for (index, chunk) in blob.chunks(self.chunk_size).enumerate() {
            set_xattr(target, &chunk_key(index), chunk)?;
            written = index + 1;
        }
        // A full final chunk makes readers probe the next key, which may
        // hold a piece of an older, longer document.
        if blob.len() % self.chunk_size == 0 {
            remove_xattr(target, &chunk_key(written))?;
        }
        Ok(())
    }

    /// Remove every metadata key from `target`.
    pub fn clear(&self, target: XattrTarget<'_>) -> Result<(), FsError> {
        for index in 0.. {
            if !remove_xattr(target, &chunk_key(index))? {
                break;
            }
        }
        Ok(())
    }
}

/// Decode a JSON object whose values are strings.  Numbers and booleans
/// are accepted and stringified; anything else is a decode failure.
fn decode_json(blob: &[u8]) -> Result<Metadata, String> {
    let value: serde_json::Value = serde_json::from_slice(blob).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(map) = value else {
        return Err("metadata is not a JSON object".to_string());
    };
    let mut out = Metadata::new();
    for (key, value) in map {
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => return Err(format!("unsupported value for {key}: {other}")),
        };
        out.insert(key, text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use std::fs;

    fn sample() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("Content-Type".into(), "text/plain".into());
        meta.insert("X-Object-Meta-Color".into(), "blue".into());
        meta
    }

    #[test]
    fn test_write_then_read() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let codec = MetadataCodec::default();
        codec.write(XattrTarget::Path(&path), &sample()).unwrap();
        assert_eq!(codec.read(XattrTarget::Path(&path)).unwrap(), sample());
    }

    #[test]
    fn test_absent_reads_empty() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let meta = MetadataCodec::default().read(XattrTarget::Path(&path)).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn test_large_document_spans_chunks() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let mut meta = Metadata::new();
        meta.insert("big".into(), "v".repeat(150));
        let codec = MetadataCodec::default().with_chunk_size(64);
        codec.write(XattrTarget::Path(&path), &meta).unwrap();

        let target = XattrTarget::Path(&path);
        assert_eq!(get_xattr(target, "user.swift.metadata").unwrap().unwrap().len(), 64);
        assert_eq!(get_xattr(target, "user.swift.metadata1").unwrap().unwrap().len(), 64);
        assert!(get_xattr(target, "user.swift.metadata2").unwrap().is_some());
        assert_eq!(codec.read(target).unwrap(), meta);
    }

    #[test]
    fn test_exactly_full_chunk_drops_stale_tail() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);
        set_xattr(target, "user.swift.metadata1", b"stale").unwrap();

        // {"k":"vvv..."} serializes to 8 bytes of framing plus the value.
        let mut meta = Metadata::new();
        meta.insert("k".into(), "v".repeat(64 - 8));
        let codec = MetadataCodec::default().with_chunk_size(64);
        codec.write(target, &meta).unwrap();

        assert!(get_xattr(target, "user.swift.metadata1").unwrap().is_none());
        assert_eq!(codec.read(target).unwrap(), meta);
    }

    #[test]
    fn test_corrupt_document_is_cleared() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);
        set_xattr(target, "user.swift.metadata", b"{not json").unwrap();

        let meta = MetadataCodec::default().read(target).unwrap();
        assert!(meta.is_empty());
        assert!(get_xattr(target, "user.swift.metadata").unwrap().is_none());
    }

    #[test]
    fn test_numbers_are_stringified() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);
        set_xattr(target, "user.swift.metadata", br#"{"Content-Length": 4}"#).unwrap();
        let meta = MetadataCodec::default().read(target).unwrap();
        assert_eq!(meta.get("Content-Length").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_pickle_gate() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        let pickled: &[u8] = b"\x80\x02}q\x00(X\x01\x00\x00\x00aq\x01X\x01\x00\x00\x00bq\x02u.";

        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);
        set_xattr(target, "user.swift.metadata", pickled).unwrap();
        let meta = MetadataCodec::new(true).read(target).unwrap();
        assert_eq!(meta.get("a").map(String::as_str), Some("b"));

        // With the gate closed the legacy document is treated as corrupt.
        let meta = MetadataCodec::new(false).read(target).unwrap();
        assert!(meta.is_empty());
        assert!(get_xattr(target, "user.swift.metadata").unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_all_chunks() {
        let dir = scratch_dir();
        let path = dir.path().join("o");
        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);
        let mut meta = Metadata::new();
        meta.insert("big".into(), "v".repeat(100));
        let codec = MetadataCodec::default().with_chunk_size(64);
        codec.write(target, &meta).unwrap();
        codec.clear(target).unwrap();
        for index in 0..3 {
            assert!(get_xattr(target, &chunk_key(index)).unwrap().is_none());
        }
    }
}
