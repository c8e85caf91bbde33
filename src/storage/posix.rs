//! POSIX filesystem backend.
//!
//! Implements [`StorageBackend`] on top of the object engine and the
//! listing engine.  All filesystem work runs on tokio's blocking pool; an
//! upload hands its writer to the pool once per body chunk.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::fs::mount::ismount;
use crate::fs::FsError;
use crate::metadata::keys::ETAG;
use crate::metadata::{strip_typing_keys, Metadata};
use crate::metrics::{record_storage_op, BYTES_RECEIVED_TOTAL, BYTES_SENT_TOTAL};

use super::backend::{
    AccountInfo, BodyStream, ContainerInfo, ContainerRow, ListParams, ListingEntry, ObjectBody,
    ObjectLocation, ObjectRow, OpenedObject, PutRequest, StorageBackend, StorageFuture,
};
use super::diskfile::{DiskFileManager, DiskFileReader, OpenedDiskFile};
use super::error::StorageError;
use super::listing::ListingEngine;

struct Inner {
    files: DiskFileManager,
    listing: ListingEngine,
    mount_check: bool,
    object_only: bool,
    recount_on_head: bool,
}

/// Storage backend that keeps everything on a (possibly shared) POSIX
/// filesystem.
#[derive(Clone)]
pub struct PosixBackend {
    inner: Arc<Inner>,
}

impl PosixBackend {
    /// `worker` is the per-server mount slot, when one was acquired.
    pub fn new(config: &StorageConfig, worker: Option<u32>) -> Self {
        let files = DiskFileManager::new(config, worker);
        let listing = ListingEngine::new(files.clone(), config.accurate_size_in_listing);
        Self {
            inner: Arc::new(Inner {
                files,
                listing,
                mount_check: config.mount_check,
                object_only: config.object_only,
                recount_on_head: config.container_update_object_count,
            }),
        }
    }

    pub fn files(&self) -> &DiskFileManager {
        &self.inner.files
    }

    pub fn listing(&self) -> &ListingEngine {
        &self.inner.listing
    }

    fn check_mount(&self, device: &str) -> Result<(), StorageError> {
        if self.inner.mount_check && !ismount(&self.inner.files.layout().device_path(device)) {
            return Err(StorageError::NotMounted {
                device: device.to_string(),
            });
        }
        Ok(())
    }

    /// Run `f` on the blocking pool and count the outcome under `op`.
    async fn run<T, F>(&self, op: &'static str, device: &str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StorageError> + Send + 'static,
    {
        let result = match self.check_mount(device) {
            Ok(()) => {
                let inner = self.inner.clone();
                blocking(move || f(&inner)).await
            }
            Err(e) => Err(e),
        };
        record_storage_op(op, result.is_ok());
        if let Err(e) = &result {
            debug!(op, error = %e, "storage operation failed");
        }
        result
    }

    async fn put_inner(
        &self,
        loc: &ObjectLocation,
        request: PutRequest,
        mut body: BodyStream,
    ) -> Result<Metadata, StorageError> {
        self.check_mount(&loc.device)?;
        let diskfile = self
            .inner
            .files
            .diskfile(&loc.device, &loc.container, &loc.object)?;
        let declared = request.content_length;
        let mut writer = blocking(move || diskfile.create(declared)).await?;

        let mut received: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("upload body ended early: {e}");
                    return Err(StorageError::ClientDisconnect {
                        declared: declared.unwrap_or(received),
                        received,
                    });
                }
            };
            received += chunk.len() as u64;
            metrics::counter!(BYTES_RECEIVED_TOTAL).increment(chunk.len() as u64);
            if declared.is_some_and(|d| received > d) {
                return Err(StorageError::ClientDisconnect {
                    declared: declared.unwrap_or_default(),
                    received,
                });
            }
            writer = blocking(move || {
                writer.write(&chunk)?;
                Ok(writer)
            })
            .await?;
        }

        if let Some(declared) = declared.filter(|d| *d != received) {
            return Err(StorageError::ClientDisconnect { declared, received });
        }
        let computed = writer.etag();
        if let Some(expected) = request.etag.as_deref() {
            let expected = expected.trim_matches('"');
            if !expected.eq_ignore_ascii_case(&computed) {
                return Err(StorageError::EtagMismatch {
                    expected: expected.to_string(),
                    computed,
                });
            }
        }

        let mut metadata = request.metadata;
        metadata.insert(ETAG.to_string(), computed);
        let stored = blocking(move || writer.commit(metadata)).await?;
        self.after_object_change(loc).await;
        Ok(strip_typing_keys(&stored))
    }

    /// Stand-in for the container update a multi-daemon deployment sends.
    async fn after_object_change(&self, loc: &ObjectLocation) {
        if self.inner.object_only {
            return;
        }
        let (device, container) = (loc.device.clone(), loc.container.clone());
        let inner = self.inner.clone();
        let result =
            blocking(move || inner.listing.container(&device, &container).update_object_count())
                .await;
        if let Err(e) = result {
            warn!(
                "container count update for {}/{} failed: {e}",
                loc.device, loc.container
            );
        }
    }
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Internal(anyhow::anyhow!("blocking task failed: {e}")))?
}

/// Body of an opened object; the reader is created on first poll.
struct PosixBody {
    opened: OpenedDiskFile,
}

enum BodyState {
    Opened(OpenedDiskFile, Option<(u64, u64)>),
    Reading(DiskFileReader),
}

fn next_chunk(state: BodyState) -> Result<Option<(Bytes, BodyState)>, FsError> {
    let mut reader = match state {
        BodyState::Opened(opened, range) => opened.reader(range)?,
        BodyState::Reading(reader) => reader,
    };
    Ok(reader
        .read_chunk()?
        .map(|chunk| (chunk, BodyState::Reading(reader))))
}

impl ObjectBody for PosixBody {
    fn into_stream(self: Box<Self>, range: Option<(u64, u64)>) -> BodyStream {
        let start = Some(BodyState::Opened(self.opened, range));
        let stream = futures::stream::unfold(start, |state| async move {
            let state = state?;
            let step = tokio::task::spawn_blocking(move || next_chunk(state)).await;
            match step {
                Ok(Ok(Some((chunk, next)))) => {
                    metrics::counter!(BYTES_SENT_TOTAL).increment(chunk.len() as u64);
                    Some((Ok(chunk), Some(next)))
                }
                Ok(Ok(None)) => None,
                Ok(Err(e)) => {
                    warn!("object read failed: {e}");
                    Some((Err(std::io::Error::other(e)), None))
                }
                Err(e) => Some((Err(std::io::Error::other(e)), None)),
            }
        });
        Box::pin(stream)
    }
}

impl StorageBackend for PosixBackend {
    fn open_object<'a>(&'a self, loc: &'a ObjectLocation) -> StorageFuture<'a, OpenedObject> {
        Box::pin(async move {
            let diskfile = self
                .inner
                .files
                .diskfile(&loc.device, &loc.container, &loc.object)?;
            let opened = self.run("open", &loc.device, move |_| diskfile.open()).await?;
            Ok(OpenedObject {
                metadata: strip_typing_keys(opened.metadata()),
                size: opened.size(),
                body: Box::new(PosixBody { opened }),
            })
        })
    }

    fn put_object<'a>(
        &'a self,
        loc: &'a ObjectLocation,
        request: PutRequest,
        body: BodyStream,
    ) -> StorageFuture<'a, Metadata> {
        Box::pin(async move {
            let result = self.put_inner(loc, request, body).await;
            record_storage_op("put", result.is_ok());
            result
        })
    }

    fn delete_object<'a>(
        &'a self,
        loc: &'a ObjectLocation,
        timestamp: f64,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let diskfile = self
                .inner
                .files
                .diskfile(&loc.device, &loc.container, &loc.object)?;
            self.run("delete", &loc.device, move |_| diskfile.delete(timestamp))
                .await?;
            self.after_object_change(loc).await;
            Ok(())
        })
    }

    fn read_object_metadata<'a>(&'a self, loc: &'a ObjectLocation) -> StorageFuture<'a, Metadata> {
        Box::pin(async move {
            let diskfile = self
                .inner
                .files
                .diskfile(&loc.device, &loc.container, &loc.object)?;
            let metadata = self
                .run("read_metadata", &loc.device, move |_| {
                    diskfile.current_metadata()
                })
                .await?;
            Ok(strip_typing_keys(&metadata))
        })
    }

    fn write_object_metadata<'a>(
        &'a self,
        loc: &'a ObjectLocation,
        metadata: Metadata,
    ) -> StorageFuture<'a, Metadata> {
        Box::pin(async move {
            let diskfile = self
                .inner
                .files
                .diskfile(&loc.device, &loc.container, &loc.object)?;
            let stored = self
                .run("write_metadata", &loc.device, move |_| {
                    // Expired objects cannot be updated; opening also
                    // refreshes stale system keys before they are carried over.
                    diskfile.open()?;
                    diskfile.write_metadata(metadata)
                })
                .await?;
            Ok(strip_typing_keys(&stored))
        })
    }

    fn list_objects<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        params: ListParams,
    ) -> StorageFuture<'a, Vec<ListingEntry<ObjectRow>>> {
        let (d, c) = (device.to_string(), container.to_string());
        Box::pin(self.run("list_objects", device, move |inner| {
            inner.listing.container(&d, &c).list_objects_iter(&params)
        }))
    }

    fn list_containers<'a>(
        &'a self,
        device: &'a str,
        params: ListParams,
    ) -> StorageFuture<'a, Vec<ListingEntry<ContainerRow>>> {
        let d = device.to_string();
        Box::pin(self.run("list_containers", device, move |inner| {
            inner.listing.account(&d).list_containers_iter(&params)
        }))
    }

    fn container_info<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
    ) -> StorageFuture<'a, ContainerInfo> {
        let (d, c) = (device.to_string(), container.to_string());
        Box::pin(self.run("container_info", device, move |inner| {
            inner
                .listing
                .container(&d, &c)
                .get_info(inner.recount_on_head)
        }))
    }

    fn create_container<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        timestamp: f64,
        metadata: Metadata,
    ) -> StorageFuture<'a, bool> {
        let (d, c) = (device.to_string(), container.to_string());
        Box::pin(self.run("create_container", device, move |inner| {
            inner.listing.container(&d, &c).initialize(timestamp, &metadata)
        }))
    }

    fn delete_container<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
    ) -> StorageFuture<'a, ()> {
        let (d, c) = (device.to_string(), container.to_string());
        Box::pin(self.run("delete_container", device, move |inner| {
            inner.listing.container(&d, &c).delete()
        }))
    }

    fn update_container_metadata<'a>(
        &'a self,
        device: &'a str,
        container: &'a str,
        metadata: Metadata,
    ) -> StorageFuture<'a, ()> {
        let (d, c) = (device.to_string(), container.to_string());
        Box::pin(self.run("update_container_metadata", device, move |inner| {
            inner.listing.container(&d, &c).update_metadata(&metadata)
        }))
    }

    fn account_info<'a>(&'a self, device: &'a str) -> StorageFuture<'a, AccountInfo> {
        let d = device.to_string();
        Box::pin(self.run("account_info", device, move |inner| {
            inner.listing.account(&d).get_info()
        }))
    }

    fn update_account_metadata<'a>(
        &'a self,
        device: &'a str,
        metadata: Metadata,
    ) -> StorageFuture<'a, ()> {
        let d = device.to_string();
        Box::pin(self.run("update_account_metadata", device, move |inner| {
            inner.listing.account(&d).update_metadata(&metadata)
        }))
    }
}
