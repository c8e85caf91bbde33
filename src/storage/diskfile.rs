//! Object engine.
//!
//! A [`DiskFile`] addresses one object: `<device>/<container>/<object>`.
//! Reads open the data file, check its metadata against the inode, and
//! regenerate the metadata when the file was changed behind our back.
//! Writes go to a dot-prefixed temp file in the final directory which
//! [`DiskFileWriter::commit`] fsyncs, tags with metadata, and renames into
//! place.  Directory objects are directories carrying marker metadata.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use md5::{Digest, Md5};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::fs::mount::MountLayout;
use crate::fs::ops::{
    do_fallocate, do_fchown, do_fdatasync, do_fstat, do_fsync, do_open, do_read, do_rename,
    do_stat, do_unlink, do_write, drop_buffer_cache, random_sleep,
};
use crate::fs::xattr::XattrTarget;
use crate::fs::FsError;
use crate::metadata::keys::*;
use crate::metadata::validate::{is_dir_object, validate_object};
use crate::metadata::{Metadata, MetadataCodec};
use crate::timestamp;

use super::dirs::{DirModel, Ownership};
use super::error::StorageError;

/// Attempts at picking a fresh temp name.
const MAX_OPEN_ATTEMPTS: usize = 10;
/// Attempts at renaming the temp file into place.
const MAX_RENAME_ATTEMPTS: usize = 10;
/// `ENOENT` failures tolerated for an object at the container root.
const MAX_CONTAINER_ENOENT: usize = 2;

/// md5 of zero bytes.
pub const EMPTY_ETAG: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// I/O tuning shared by every object.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub disk_chunk_size: usize,
    pub bytes_per_sync: u64,
    pub keep_cache_window: u64,
    pub relaxed_writes: bool,
    pub implicit_dir_objects: bool,
}

impl Tuning {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            disk_chunk_size: config.disk_chunk_size.max(1),
            bytes_per_sync: config.bytes_per_sync.max(1),
            keep_cache_window: config.keep_cache_window,
            relaxed_writes: config.relaxed_writes,
            implicit_dir_objects: config.implicit_dir_objects,
        }
    }
}

/// Hands out [`DiskFile`]s for a device layout.
#[derive(Debug, Clone)]
pub struct DiskFileManager {
    layout: MountLayout,
    dirs: DirModel,
    tuning: Tuning,
}

impl DiskFileManager {
    pub fn new(config: &StorageConfig, worker: Option<u32>) -> Self {
        Self {
            layout: MountLayout::new(config.devices.clone(), worker, config.use_put_mount),
            dirs: DirModel {
                codec: MetadataCodec::new(config.read_pickled_metadata),
                owner: Ownership {
                    uid: config.object_uid,
                    gid: config.object_gid,
                },
                mkdir_locking: config.mkdir_locking,
            },
            tuning: Tuning::from_config(config),
        }
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    pub fn dirs(&self) -> &DirModel {
        &self.dirs
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Address `obj` in `container` on `device`.  Names with empty, `.`, or
    /// `..` segments cannot address anything and read as missing.
    pub fn diskfile(&self, device: &str, container: &str, obj: &str) -> Result<DiskFile, StorageError> {
        let safe = !obj.is_empty()
            && Path::new(obj)
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && !obj.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
        if !safe || container.is_empty() || container.contains('/') {
            return Err(StorageError::NotFound);
        }
        let container_path = self.layout.device_path(device).join(container);
        let put_container_path = self.layout.put_device_path(device).join(container);
        Ok(DiskFile {
            dirs: self.dirs,
            tuning: self.tuning,
            data_file: container_path.join(obj),
            put_data_file: put_container_path.join(obj),
            container_path,
            put_container_path,
            obj: obj.to_string(),
        })
    }
}

/// One object on disk.
#[derive(Debug, Clone)]
pub struct DiskFile {
    dirs: DirModel,
    tuning: Tuning,
    container_path: PathBuf,
    put_container_path: PathBuf,
    obj: String,
    data_file: PathBuf,
    put_data_file: PathBuf,
}

impl DiskFile {
    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn container_path(&self) -> &Path {
        &self.container_path
    }

    fn codec(&self) -> MetadataCodec {
        self.dirs.codec
    }

    /// Object path relative to the container, minus the final segment.
    fn obj_dir(&self) -> &Path {
        Path::new(&self.obj).parent().unwrap_or(Path::new(""))
    }

    fn obj_name(&self) -> &str {
        self.obj.rsplit('/').next().unwrap_or(&self.obj)
    }

    /// Open the data file and return its metadata, regenerating it in
    /// place when it is missing or stale.
    fn open_validated(&self) -> Result<(File, std::fs::Metadata, Metadata), StorageError> {
        let mut options = OpenOptions::new();
        options.read(true);
        let mut file = match do_open(&self.data_file, &options) {
            Ok(file) => file,
            Err(e) if e.is_vanished() || e.errno() == Some(libc::ENOTDIR) => {
                return Err(StorageError::NotFound)
            }
            Err(e) => return Err(e.into()),
        };
        let stat = match do_fstat(&file, &self.data_file) {
            Ok(stat) => stat,
            Err(e) if e.is_vanished() => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let mut metadata = match self.codec().read(XattrTarget::Fd(&file)) {
            Ok(metadata) => metadata,
            Err(e) if e.is_vanished() => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        if stat.is_dir() && !is_dir_object(&metadata) && !self.tuning.implicit_dir_objects {
            return Err(StorageError::NotFound);
        }
        if !validate_object(&metadata, Some(&stat)) {
            debug!("regenerating metadata for {}", self.data_file.display());
            metadata = regenerate_metadata(
                &mut file,
                &self.data_file,
                &stat,
                &metadata,
                self.codec(),
                self.tuning.disk_chunk_size,
            )?;
        }
        Ok((file, stat, metadata))
    }

    /// Current object metadata, regenerated if stale.  Unlike [`open`],
    /// an expired object is still returned.
    ///
    /// [`open`]: DiskFile::open
    pub fn current_metadata(&self) -> Result<Metadata, StorageError> {
        self.open_validated().map(|(_, _, metadata)| metadata)
    }

    /// Open the object for reading.
    ///
    /// Stale or missing metadata is regenerated in place.  An object whose
    /// `X-Delete-At` has passed yields [`StorageError::Expired`].
    pub fn open(&self) -> Result<OpenedDiskFile, StorageError> {
        let (file, stat, metadata) = self.open_validated()?;
        if let Some(delete_at) = metadata.get(X_DELETE_AT) {
            match timestamp::parse(delete_at) {
                Some(at) if at <= timestamp::now() => {
                    return Err(StorageError::Expired {
                        delete_at: delete_at.clone(),
                    });
                }
                Some(_) => {}
                None => warn!(
                    "ignoring unparsable X-Delete-At {delete_at:?} on {}",
                    self.data_file.display()
                ),
            }
        }

        let is_dir = stat.is_dir();
        let size = if is_dir { 0 } else { stat.len() };
        Ok(OpenedDiskFile {
            file,
            path: self.data_file.clone(),
            metadata,
            size,
            is_dir,
            tuning: self.tuning,
        })
    }

    /// Read the stored metadata without validating it.  `NotFound` when
    /// the object does not exist.
    pub fn read_metadata(&self) -> Result<Metadata, StorageError> {
        match self.codec().read(XattrTarget::Path(&self.data_file)) {
            Ok(metadata) => Ok(metadata),
            Err(e) if e.is_vanished() || e.errno() == Some(libc::ENOTDIR) => {
                Err(StorageError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuild the stored metadata from the file, keeping user keys and the
    /// content type.  Used by operators after out-of-band changes.
    pub fn repair_metadata(&self) -> Result<Metadata, StorageError> {
        let existing = self.read_metadata()?;
        let mut options = OpenOptions::new();
        options.read(true);
        let mut file = match do_open(&self.data_file, &options) {
            Ok(file) => file,
            Err(e) if e.is_vanished() => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let stat = do_fstat(&file, &self.data_file)?;
        self.codec().clear(XattrTarget::Fd(&file))?;
        regenerate_metadata(
            &mut file,
            &self.data_file,
            &stat,
            &existing,
            self.codec(),
            self.tuning.disk_chunk_size,
        )
    }

    /// Start a write.  `size`, when known, is passed to `fallocate`.
    pub fn create(&self, size: Option<u64>) -> Result<DiskFileWriter, StorageError> {
        let datadir = self.put_container_path.join(self.obj_dir());
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);

        let mut attempts = 0;
        let mut container_enoent = 0;
        let mut chains_built = 0;
        let (file, tmppath) = loop {
            if attempts >= MAX_OPEN_ATTEMPTS {
                return Err(anyhow::anyhow!(
                    "giving up on a temp file for {} after {attempts} attempts",
                    self.put_data_file.display()
                )
                .into());
            }
            let tmppath = datadir.join(format!(
                ".{}.{}",
                self.obj_name(),
                uuid::Uuid::new_v4().simple()
            ));
            let err = match do_open(&tmppath, &options) {
                Ok(file) => break (file, tmppath),
                Err(e) => e,
            };
            if err.is_no_space() {
                return Err(StorageError::NoSpace(err));
            }
            match err.errno() {
                Some(libc::EEXIST) => attempts += 1,
                Some(libc::ENOTDIR) => {
                    return Err(StorageError::AlreadyExistsAsFile { path: datadir });
                }
                Some(libc::EIO) => {
                    attempts += 1;
                    warn!("{err}; retrying temp file creation");
                    random_sleep(1, 5);
                }
                Some(libc::ENOENT) if self.obj_dir().as_os_str().is_empty() => {
                    attempts += 1;
                    container_enoent += 1;
                    if container_enoent >= MAX_CONTAINER_ENOENT {
                        return Err(StorageError::ContainerNotFound {
                            container: self.put_container_path.display().to_string(),
                        });
                    }
                    warn!("{err}; container may be settling, retrying");
                    random_sleep(1, 5);
                }
                Some(libc::ENOENT) => {
                    chains_built += 1;
                    if chains_built > MAX_OPEN_ATTEMPTS {
                        return Err(StorageError::ContainerGone {
                            path: self.put_container_path.clone(),
                        });
                    }
                    self.dirs
                        .create_dir_chain(&self.put_container_path, self.obj_dir(), None)?;
                }
                _ => return Err(err.into()),
            }
        };

        let mut writer = DiskFileWriter {
            file,
            tmppath: Some(tmppath),
            target: self.put_data_file.clone(),
            datadir,
            container_path: self.put_container_path.clone(),
            obj: self.obj.clone(),
            dirs: self.dirs,
            tuning: self.tuning,
            hasher: Md5::new(),
            upload_size: 0,
            last_sync: 0,
        };
        writer.prepare(size)?;
        Ok(writer)
    }

    /// Delete the object if its timestamp is older than `ts`.
    ///
    /// A directory object is downgraded to a plain directory and removed
    /// when empty.  Gratuitous ancestors are pruned afterwards.
    pub fn delete(&self, ts: f64) -> Result<(), StorageError> {
        let stat = do_stat(&self.data_file)?.ok_or(StorageError::NotFound)?;
        let mut metadata = self.read_metadata()?;
        if stat.is_dir() && !is_dir_object(&metadata) && !self.tuning.implicit_dir_objects {
            return Err(StorageError::NotFound);
        }
        if let Some(current) = metadata.get(X_TIMESTAMP).and_then(|t| timestamp::parse(t)) {
            if current >= ts {
                debug!(
                    "skipping delete of {}: stored {current} >= request {ts}",
                    self.data_file.display()
                );
                return Ok(());
            }
        }

        if stat.is_dir() {
            if is_dir_object(&metadata) {
                metadata.insert(X_OBJECT_TYPE.to_string(), DIR_NON_OBJECT.to_string());
                self.codec()
                    .write(XattrTarget::Path(&self.data_file), &metadata)?;
            }
            self.dirs.rmobjdir(&self.data_file, true)?;
        } else {
            do_unlink(&self.data_file)?;
        }

        if let Some(parent) = self.data_file.parent() {
            self.dirs.prune_ancestors(parent, &self.container_path)?;
        }
        Ok(())
    }

    /// Replace user metadata (the POST path).  System keys are carried
    /// over from the stored document.
    pub fn write_metadata(&self, mut incoming: Metadata) -> Result<Metadata, StorageError> {
        let existing = self.read_metadata()?;
        for key in POST_PRESERVED_KEYS {
            if let Some(value) = existing.get(*key) {
                incoming.insert(key.to_string(), value.clone());
            }
        }
        if !incoming.contains_key(X_OBJECT_TYPE) {
            let kind = if incoming.get(CONTENT_TYPE).map(String::as_str) == Some(DIR_TYPE) {
                DIR_OBJECT
            } else {
                FILE
            };
            incoming.insert(X_OBJECT_TYPE.to_string(), kind.to_string());
        }
        self.codec()
            .write(XattrTarget::Path(&self.data_file), &incoming)?;
        Ok(incoming)
    }
}

/// Rebuild object metadata from the file itself.  User metadata and a
/// non-empty `Content-Type` survive; everything derived from the bytes is
/// recomputed.
fn regenerate_metadata(
    file: &mut File,
    path: &Path,
    stat: &std::fs::Metadata,
    existing: &Metadata,
    codec: MetadataCodec,
    chunk_size: usize,
) -> Result<Metadata, StorageError> {
    let mtime = timestamp::normalize(timestamp::mtime_of(stat));
    let mut metadata = existing.clone();
    let (etag, length, kind) = if stat.is_dir() {
        let kind = if is_dir_object(existing) {
            DIR_OBJECT
        } else {
            DIR_NON_OBJECT
        };
        (EMPTY_ETAG.to_string(), 0, kind)
    } else {
        (hash_file(file, path, chunk_size)?, stat.len(), FILE)
    };

    let content_type = match existing.get(CONTENT_TYPE) {
        Some(ct) if !ct.is_empty() => ct.clone(),
        _ if stat.is_dir() => DIR_TYPE.to_string(),
        _ => DEFAULT_CONTENT_TYPE.to_string(),
    };
    metadata.insert(X_TIMESTAMP.to_string(), mtime.clone());
    metadata.insert(CONTENT_TYPE.to_string(), content_type);
    metadata.insert(ETAG.to_string(), etag);
    metadata.insert(CONTENT_LENGTH.to_string(), length.to_string());
    metadata.insert(X_TYPE.to_string(), OBJECT.to_string());
    metadata.insert(X_OBJECT_TYPE.to_string(), kind.to_string());
    metadata.insert(X_OBJECT_PUT_MTIME.to_string(), mtime);

    codec.write(XattrTarget::Fd(file), &metadata)?;
    Ok(metadata)
}

/// md5 of the whole file, read in `chunk_size` pieces from the start.
fn hash_file(file: &mut File, path: &Path, chunk_size: usize) -> Result<String, FsError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| FsError::new("lseek", path, e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = do_read(file, path, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// An object opened for reading.
#[derive(Debug)]
pub struct OpenedDiskFile {
    file: File,
    path: PathBuf,
    metadata: Metadata,
    size: u64,
    is_dir: bool,
    tuning: Tuning,
}

impl OpenedDiskFile {
    /// Full stored metadata, typing keys included.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Stream bytes `[start, end]` (inclusive), or the whole object.
    pub fn reader(mut self, range: Option<(u64, u64)>) -> Result<DiskFileReader, FsError> {
        let (start, end) = match range {
            _ if self.is_dir => (0, 0),
            Some((start, last)) => (start, last.saturating_add(1).min(self.size)),
            None => (0, self.size),
        };
        // Regeneration on open leaves the offset at EOF.
        if !self.is_dir {
            self.file
                .seek(SeekFrom::Start(start))
                .map_err(|e| FsError::new("lseek", &self.path, e))?;
        }
        Ok(DiskFileReader {
            file: self.file,
            path: self.path,
            chunk_size: self.tuning.disk_chunk_size,
            keep_cache_window: self.tuning.keep_cache_window,
            pos: start,
            end,
            dropped_upto: start,
        })
    }
}

/// Reads an object in fixed-size chunks, hinting the kernel to drop cached
/// pages behind it.
#[derive(Debug)]
pub struct DiskFileReader {
    file: File,
    path: PathBuf,
    chunk_size: usize,
    keep_cache_window: u64,
    pos: u64,
    end: u64,
    dropped_upto: u64,
}

impl DiskFileReader {
    /// Next chunk, or `None` at the end of the requested range.
    pub fn read_chunk(&mut self) -> Result<Option<Bytes>, FsError> {
        if self.pos >= self.end {
            self.drop_behind();
            return Ok(None);
        }
        let want = (self.end - self.pos).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        let n = do_read(&mut self.file, &self.path, &mut buf)?;
        if n == 0 {
            self.drop_behind();
            return Ok(None);
        }
        buf.truncate(n);
        self.pos += n as u64;
        if self.pos - self.dropped_upto >= self.keep_cache_window {
            self.drop_behind();
        }
        Ok(Some(Bytes::from(buf)))
    }

    fn drop_behind(&mut self) {
        if self.pos > self.dropped_upto {
            drop_buffer_cache(
                &self.file,
                &self.path,
                self.dropped_upto,
                self.pos - self.dropped_upto,
            );
            self.dropped_upto = self.pos;
        }
    }
}

/// An in-progress write.  Dropping it without a successful commit removes
/// the temp file.
#[derive(Debug)]
pub struct DiskFileWriter {
    file: File,
    tmppath: Option<PathBuf>,
    target: PathBuf,
    datadir: PathBuf,
    container_path: PathBuf,
    obj: String,
    dirs: DirModel,
    tuning: Tuning,
    hasher: Md5,
    upload_size: u64,
    last_sync: u64,
}

impl DiskFileWriter {
    fn tmp(&self) -> &Path {
        self.tmppath.as_deref().unwrap_or(&self.target)
    }

    fn prepare(&mut self, size: Option<u64>) -> Result<(), StorageError> {
        do_fchown(
            &self.file,
            self.tmp(),
            self.dirs.owner.uid,
            self.dirs.owner.gid,
        )?;
        if let Some(size) = size.filter(|s| *s > 0) {
            match do_fallocate(&self.file, self.tmp(), size) {
                Ok(()) => {}
                Err(e) if e.is_no_space() => return Err(StorageError::NoSpace(e)),
                Err(e) => debug!("fallocate hint ignored: {e}"),
            }
        }
        Ok(())
    }

    /// Path of the temp file while the write is open.
    pub fn tmppath(&self) -> Option<&Path> {
        self.tmppath.as_deref()
    }

    /// Append `chunk`, returning the running byte count.
    pub fn write(&mut self, chunk: &[u8]) -> Result<u64, StorageError> {
        let tmp = self.tmp().to_path_buf();
        do_write(&mut self.file, &tmp, chunk)?;
        self.hasher.update(chunk);
        self.upload_size += chunk.len() as u64;

        if !self.tuning.relaxed_writes
            && self.upload_size - self.last_sync >= self.tuning.bytes_per_sync
        {
            do_fdatasync(&self.file, &tmp)?;
            drop_buffer_cache(&self.file, &tmp, self.last_sync, self.upload_size - self.last_sync);
            self.last_sync = self.upload_size;
        }
        Ok(self.upload_size)
    }

    pub fn upload_size(&self) -> u64 {
        self.upload_size
    }

    /// Hex md5 of everything written so far.
    pub fn etag(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }

    /// Make the write visible under its final name.
    ///
    /// Returns the metadata as stored.
    pub fn commit(mut self, metadata: Metadata) -> Result<Metadata, StorageError> {
        let metadata = self.normalize(metadata)?;

        if is_dir_object(&metadata) {
            let written = self.dirs.create_dir_chain(
                &self.container_path,
                Path::new(&self.obj),
                Some(&metadata),
            )?;
            // Drop removes the unused temp file.
            return Ok(written.unwrap_or(metadata));
        }

        if let Some(stat) = do_stat(&self.target)? {
            if stat.is_dir() {
                return Err(StorageError::AlreadyExistsAsDir {
                    path: self.target.clone(),
                });
            }
        }

        let tmp = self.tmp().to_path_buf();
        self.dirs.codec.write(XattrTarget::Fd(&self.file), &metadata)?;
        if !self.tuning.relaxed_writes {
            do_fsync(&self.file, &tmp)?;
            drop_buffer_cache(&self.file, &tmp, 0, 0);
        }

        self.rename_into_place(&tmp)?;
        self.tmppath = None;
        Ok(metadata)
    }

    fn normalize(&self, mut metadata: Metadata) -> Result<Metadata, StorageError> {
        let content_type = match metadata.get(CONTENT_TYPE) {
            Some(ct) if !ct.is_empty() => ct.clone(),
            _ => DEFAULT_CONTENT_TYPE.to_string(),
        };
        let kind = if content_type == DIR_TYPE {
            DIR_OBJECT
        } else {
            FILE
        };
        let stat = do_fstat(&self.file, self.tmp())?;
        metadata.insert(CONTENT_TYPE.to_string(), content_type);
        metadata.insert(X_OBJECT_TYPE.to_string(), kind.to_string());
        metadata.insert(X_TYPE.to_string(), OBJECT.to_string());
        metadata.insert(
            X_OBJECT_PUT_MTIME.to_string(),
            timestamp::normalize(timestamp::mtime_of(&stat)),
        );
        metadata.insert(CONTENT_LENGTH.to_string(), self.upload_size.to_string());
        metadata
            .entry(ETAG.to_string())
            .or_insert_with(|| self.etag());
        Ok(metadata)
    }

    fn rename_into_place(&self, tmp: &Path) -> Result<(), StorageError> {
        let mut attempts = 0;
        loop {
            let err = match do_rename(tmp, &self.target) {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let transient = matches!(
                err.errno(),
                Some(libc::ENOENT) | Some(libc::EIO) | Some(libc::EBUSY) | Some(libc::ESTALE)
            );
            if !transient || attempts >= MAX_RENAME_ATTEMPTS {
                return Err(err.into());
            }
            attempts += 1;
            random_sleep(1, 5);

            let fd_stat = do_fstat(&self.file, tmp)?;
            let same_inode = match do_stat(tmp)? {
                Some(tmp_stat) => {
                    use std::os::unix::fs::MetadataExt;
                    tmp_stat.ino() == fd_stat.ino()
                }
                None => false,
            };
            if !same_inode {
                return Err(StorageError::TempAlreadyRenamed {
                    path: tmp.to_path_buf(),
                });
            }
            match do_stat(&self.datadir)? {
                Some(stat) if stat.is_dir() => {
                    warn!("{err}; retrying rename to {}", self.target.display());
                }
                _ => {
                    return Err(StorageError::DatadirGone {
                        path: self.datadir.clone(),
                    })
                }
            }
        }
    }
}

impl Drop for DiskFileWriter {
    fn drop(&mut self) {
        if let Some(tmp) = self.tmppath.take() {
            if let Err(e) = do_unlink(&tmp) {
                warn!("failed to remove temp file: {e}");
            }
        }
    }
}

/// True for names of the form `.<name>.<32 hex>` used by in-flight writes.
pub fn is_temp_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('.') else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((base, suffix)) => {
            !base.is_empty()
                && suffix.len() == 32
                && suffix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        }
        None => false,
    }
}
