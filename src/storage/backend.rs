//! Abstract storage backend trait.
//!
//! The HTTP layer talks to storage only through [`StorageBackend`].  It
//! resolves an account to a device with the placement ring first, so every
//! method here is addressed by device rather than account name.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use super::error::StorageError;
use crate::metadata::Metadata;

/// Byte stream of an object body or an incoming upload.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Boxed future returned by every backend method.
pub type StorageFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Where an object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub device: String,
    pub container: String,
    pub object: String,
}

impl ObjectLocation {
    pub fn new(
        device: impl Into<String>,
        container: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            container: container.into(),
            object: object.into(),
        }
    }
}

/// Parameters of an object PUT besides the body.
#[derive(Debug, Clone, Default)]
pub struct PutRequest {
    /// Metadata to store: `X-Timestamp`, `Content-Type`, user keys.
    pub metadata: Metadata,
    /// Declared body length; a mismatch aborts the write.
    pub content_length: Option<u64>,
    /// Client-supplied md5; a mismatch aborts the write.
    pub etag: Option<String>,
}

/// Lazily produces the body of an opened object.
pub trait ObjectBody: Send {
    /// Stream bytes `[start, end]` inclusive, or everything.
    fn into_stream(self: Box<Self>, range: Option<(u64, u64)>) -> BodyStream;
}

/// An object ready to be served.
pub struct OpenedObject {
    /// Stored metadata with the internal typing keys removed.
    pub metadata: Metadata,
    pub size: u64,
    pub body: Box<dyn ObjectBody>,
}

impl std::fmt::Debug for OpenedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedObject")
            .field("metadata", &self.metadata)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub prefix: Option<String>,
    pub delimiter: Option<char>,
    pub marker: Option<String>,
    pub end_marker: Option<String>,
    /// List only the direct children of this path.
    pub path: Option<String>,
    pub limit: usize,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            prefix: None,
            delimiter: None,
            marker: None,
            end_marker: None,
            path: None,
            limit: 10_000,
        }
    }
}

/// A listing row or a synthesized `subdir` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingEntry<T> {
    Item(T),
    Subdir(String),
}

impl<T: AsRef<str>> ListingEntry<T> {
    /// The name the row sorts by.
    pub fn name(&self) -> &str {
        match self {
            ListingEntry::Item(item) => item.as_ref(),
            ListingEntry::Subdir(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRow {
    pub name: String,
    /// Normalized `X-Timestamp`.
    pub timestamp: String,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
}

impl AsRef<str> for ObjectRow {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    pub name: String,
    pub object_count: u64,
    pub bytes_used: u64,
}

impl AsRef<str> for ContainerRow {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub object_count: u64,
    pub bytes_used: u64,
    pub put_timestamp: String,
    pub created_at: String,
    /// `X-Container-Meta-*` entries.
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub name: String,
    pub container_count: u64,
    pub object_count: u64,
    pub bytes_used: u64,
    pub put_timestamp: String,
    pub created_at: String,
    /// `X-Account-Meta-*` entries.
    pub metadata: Metadata,
}

/// Async storage contract: one object engine plus synthesized container
/// and account databases.
pub trait StorageBackend: Send + Sync + 'static {
    /// Open an object for reading.
    fn open_object<'a>(&'a self, loc: &'a ObjectLocation) -> StorageFuture<'a, OpenedObject>;

    /// Stream `body` into a new version of the object, returning the stored
    /// metadata.
    fn put_object<'a>(
        &'a self,
        loc: &'a ObjectLocation,
        request: PutRequest,
        body: BodyStream,
    ) -> StorageFuture<'a, Metadata>;

    /// Delete the object if it is older than `timestamp`.
    fn delete_object<'a>(&'a self, loc: &'a ObjectLocation, timestamp: f64)
        -> StorageFuture<'a, ()>;

    /// Stored object metadata (typing keys removed), regenerated if stale.
    fn read_object_metadata<'a>(&'a self, loc: &'a ObjectLocation) -> StorageFuture<'a, Metadata>;

    /// Replace the object's user metadata.
    fn write_object_metadata<'a>(
        &'a self,
        loc: &'a ObjectLocation,
        metadata: Metadata,
    ) -> StorageFuture<'a, Metadata>;

    fn list_objects<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        params: ListParams,
    ) -> StorageFuture<'a, Vec<ListingEntry<ObjectRow>>>;

    fn list_containers<'a>(
        &'a self,
        device: &'a str,
        params: ListParams,
    ) -> StorageFuture<'a, Vec<ListingEntry<ContainerRow>>>;

    fn container_info<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
    ) -> StorageFuture<'a, ContainerInfo>;

    /// Create a container; `false` when it already existed (its metadata is
    /// updated instead).
    fn create_container<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        timestamp: f64,
        metadata: Metadata,
    ) -> StorageFuture<'a, bool>;

    /// Remove an empty container.
    fn delete_container<'a>(&'a self, device: &'a str, container: &'a str)
        -> StorageFuture<'a, ()>;

    /// Merge metadata into the container; empty values delete keys.
    fn update_container_metadata<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        metadata: Metadata,
    ) -> StorageFuture<'a, ()>;

    fn account_info<'a>(&'a self, device: &'a str) -> StorageFuture<'a, AccountInfo>;

    /// Merge metadata into the account; empty values delete keys.
    fn update_account_metadata<'a>(
        &'a self,
        device: &'a str,
        metadata: Metadata,
    ) -> StorageFuture<'a, ()>;
}
