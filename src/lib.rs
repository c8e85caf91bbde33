//! posixstore library -- Swift-style object storage on a POSIX filesystem.
//!
//! Objects are plain files under `<devices>/<account>/<container>/`, with
//! their metadata in extended attributes.  Containers and accounts are the
//! directories themselves.  This crate provides the filesystem primitives,
//! the metadata codec, the object and listing engines, the single-node
//! placement shim, request constraints, and the HTTP layer that serves
//! them.

use std::sync::Arc;

pub mod config;
pub mod constraints;
pub mod errors;
pub mod fs;
pub mod handlers;
pub mod metadata;
pub mod metrics;
pub mod ring;
pub mod server;
pub mod storage;
pub mod timestamp;
pub mod xml;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::Config;
use crate::ring::Ring;
use crate::storage::backend::StorageBackend;
use crate::storage::posix::PosixBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Account-to-device placement.
    pub ring: Ring,
    /// Object engine plus container and account views.
    pub storage: Arc<dyn StorageBackend>,
}

impl AppState {
    /// State backed by the POSIX engine.  `worker` is this process's mount
    /// slot when per-server mounts are enabled.
    pub fn new(config: Config, ring: Ring, worker: Option<u32>) -> Self {
        let storage = Arc::new(PosixBackend::new(&config.storage, worker));
        Self {
            config,
            ring,
            storage,
        }
    }
}
