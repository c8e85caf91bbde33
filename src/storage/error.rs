//! Engine-level errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::fs::FsError;

/// Everything the object and listing engines can report to a caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object does not exist")]
    NotFound,

    /// `X-Delete-At` has passed; the data is still on disk for the expirer.
    #[error("object expired at {delete_at}")]
    Expired { delete_at: String },

    #[error("no space left on device: {0}")]
    NoSpace(#[source] FsError),

    /// A path component that must be a directory is a file.
    #[error("{} already exists as a file", path.display())]
    AlreadyExistsAsFile { path: PathBuf },

    /// The write target is an existing directory.
    #[error("{} already exists as a directory", path.display())]
    AlreadyExistsAsDir { path: PathBuf },

    #[error("container {container} does not exist")]
    ContainerNotFound { container: String },

    /// The container disappeared while a write was in progress.
    #[error("container vanished during write: {}", path.display())]
    ContainerGone { path: PathBuf },

    #[error("container is not empty")]
    NotEmpty,

    #[error("ETag {expected} does not match computed {computed}")]
    EtagMismatch { expected: String, computed: String },

    /// The client sent fewer or more bytes than it declared.
    #[error("client sent {received} bytes, declared {declared}")]
    ClientDisconnect { declared: u64, received: u64 },

    /// Another writer renamed our temp file's inode away.
    #[error("temp file {} was already renamed", path.display())]
    TempAlreadyRenamed { path: PathBuf },

    #[error("data directory {} is gone or not a directory", path.display())]
    DatadirGone { path: PathBuf },

    /// The account's volume is not in the ring.
    #[error("volume for account {account} is not in the ring")]
    VolumeNotInRing { account: String },

    #[error("device {device} is not mounted")]
    NotMounted { device: String },

    #[error(transparent)]
    Fs(FsError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<FsError> for StorageError {
    fn from(err: FsError) -> Self {
        if err.is_no_space() {
            StorageError::NoSpace(err)
        } else {
            StorageError::Fs(err)
        }
    }
}

impl StorageError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound => "not_found",
            StorageError::Expired { .. } => "expired",
            StorageError::NoSpace(_) => "no_space",
            StorageError::AlreadyExistsAsFile { .. } => "exists_as_file",
            StorageError::AlreadyExistsAsDir { .. } => "exists_as_dir",
            StorageError::ContainerNotFound { .. } => "container_not_found",
            StorageError::ContainerGone { .. } => "container_gone",
            StorageError::NotEmpty => "not_empty",
            StorageError::EtagMismatch { .. } => "etag_mismatch",
            StorageError::ClientDisconnect { .. } => "client_disconnect",
            StorageError::TempAlreadyRenamed { .. } => "temp_renamed",
            StorageError::DatadirGone { .. } => "datadir_gone",
            StorageError::VolumeNotInRing { .. } => "not_in_ring",
            StorageError::NotMounted { .. } => "not_mounted",
            StorageError::Fs(_) => "fs",
            StorageError::Internal(_) => "internal",
        }
    }
}
