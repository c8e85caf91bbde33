//! Object, container, and account metadata.
//!
//! Metadata is a flat string-to-string map serialized as JSON into one or
//! more `user.swift.metadata*` extended attributes.  [`codec`] handles the
//! on-disk encoding, [`validate`] decides whether a stored document is
//! complete and current, and [`pickle`] reads legacy documents.

use std::collections::BTreeMap;

pub mod codec;
pub mod keys;
pub mod pickle;
pub mod validate;

pub use codec::MetadataCodec;

/// Metadata document.  Ordered so serialized output is stable.
pub type Metadata = BTreeMap<String, String>;

/// Copy of `metadata` without the internal typing keys.
pub fn strip_typing_keys(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(k, _)| !keys::TYPING_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Entries whose key starts with `prefix`, compared case-insensitively.
pub fn user_metadata<'a>(
    metadata: &'a Metadata,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
    metadata.iter().filter(move |(k, _)| {
        k.len() > prefix.len()
            && k.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    })
}
