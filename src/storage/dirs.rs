//! Directory model.
//!
//! A directory is either *gratuitous* (it exists only to hold something
//! deeper) or an explicit *directory object* whose metadata carries
//! `X-Object-Type: marker_dir`.  Gratuitous directories are created on
//! demand and pruned as soon as they are empty; directory objects are only
//! removed by an explicit delete.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::fs::ops::{do_chown, do_flock, do_mkdir, do_rmdir, do_stat, do_walk, random_sleep};
use crate::fs::xattr::XattrTarget;
use crate::fs::FsError;
use crate::metadata::validate::is_dir_object;
use crate::metadata::{Metadata, MetadataCodec};

use super::error::StorageError;

/// Owner applied to anything the engine creates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// Result of a single `mkdir` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkdirOutcome {
    Created,
    /// A directory was already there.
    Existed,
    /// Some ancestor is missing.
    ParentMissing,
}

fn is_not_empty(err: &FsError) -> bool {
    matches!(err.errno(), Some(libc::ENOTEMPTY) | Some(libc::EEXIST))
}

/// Directory operations shared by the object and listing engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirModel {
    pub codec: MetadataCodec,
    pub owner: Ownership,
    /// Hold an exclusive flock on the parent while creating a directory.
    pub mkdir_locking: bool,
}

impl DirModel {
    /// True when `path` is a directory object.  A vanished path is not.
    pub fn is_dir_object(&self, path: &Path) -> Result<bool, FsError> {
        match self.codec.read(XattrTarget::Path(path)) {
            Ok(metadata) => Ok(is_dir_object(&metadata)),
            Err(e) if e.is_vanished() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove `path` and every gratuitous directory below it.
    ///
    /// Returns `Ok(true)` when `path` is gone afterwards and `Ok(false)`
    /// when something live (a file, or a directory object if
    /// `marker_check` is set) kept it.
    pub fn rmobjdir(&self, path: &Path, marker_check: bool) -> Result<bool, FsError> {
        match do_rmdir(path) {
            Ok(()) => return Ok(true),
            Err(e) if e.is_vanished() => return Ok(true),
            Err(e) if is_not_empty(&e) => {}
            Err(e) => return Err(e),
        }

        let walk = match do_walk(path, false) {
            Ok(walk) => walk,
            Err(e) if e.is_vanished() => return Ok(true),
            Err(e) => return Err(e),
        };
        for entry in walk {
            for name in &entry.dirs {
                let full = entry.dir.join(name);
                if marker_check {
                    match self.codec.read(XattrTarget::Path(&full)) {
                        Ok(metadata) if is_dir_object(&metadata) => return Ok(false),
                        Ok(_) => {}
                        Err(e) if e.is_vanished() => continue,
                        Err(e) => return Err(e),
                    }
                }
                match do_rmdir(&full) {
                    Ok(()) => {}
                    Err(e) if e.is_vanished() => {}
                    Err(e) if is_not_empty(&e) => return Ok(false),
                    Err(e) => return Err(e),
                }
            }
        }

        match do_rmdir(path) {
            Ok(()) => Ok(true),
            Err(e) if e.is_vanished() => Ok(true),
            Err(e) if is_not_empty(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Walk upward from `start`, removing gratuitous directories, until
    /// `stop` (exclusive), a directory object, or a non-empty directory.
    pub fn prune_ancestors(&self, start: &Path, stop: &Path) -> Result<(), FsError> {
        let mut dir = start.to_path_buf();
        while dir != stop && dir.starts_with(stop) {
            if self.is_dir_object(&dir)? {
                debug!("pruning stopped at directory object {}", dir.display());
                break;
            }
            if !self.rmobjdir(&dir, true)? {
                break;
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(())
    }

    fn mkdir_once(&self, path: &Path) -> Result<MkdirOutcome, StorageError> {
        match do_mkdir(path) {
            Ok(()) => {
                do_chown(path, self.owner.uid, self.owner.gid)?;
                Ok(MkdirOutcome::Created)
            }
            Err(e) if e.is_not_found() => Ok(MkdirOutcome::ParentMissing),
            Err(e) if e.errno() == Some(libc::EEXIST) => match do_stat(path)? {
                Some(stat) if stat.is_dir() => Ok(MkdirOutcome::Existed),
                Some(_) => Err(StorageError::AlreadyExistsAsFile {
                    path: path.to_path_buf(),
                }),
                // Removed again between mkdir and stat.
                None => Ok(MkdirOutcome::ParentMissing),
            },
            Err(e) if e.errno() == Some(libc::ENOTDIR) => Err(StorageError::AlreadyExistsAsFile {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Create one directory, retrying a transient `EIO` once.
    pub fn make_directory(&self, path: &Path) -> Result<MkdirOutcome, StorageError> {
        let _lock = if self.mkdir_locking {
            lock_parent(path)?
        } else {
            None
        };
        match self.mkdir_once(path) {
            Err(StorageError::Fs(e)) if e.errno() == Some(libc::EIO) => {
                warn!("mkdir({}) returned EIO, retrying once", path.display());
                random_sleep(1, 5);
                self.mkdir_once(path)
            }
            other => other,
        }
    }

    /// Create `container/rel` and any missing ancestors below `container`.
    ///
    /// Only the leaf receives `metadata` (merged over whatever it already
    /// carries); intermediate directories stay gratuitous.  Returns the
    /// metadata written to the leaf, if any.
    pub fn create_dir_chain(
        &self,
        container: &Path,
        rel: &Path,
        metadata: Option<&Metadata>,
    ) -> Result<Option<Metadata>, StorageError> {
        let components: Vec<&std::ffi::OsStr> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect();
        if components.is_empty() {
            return Ok(None);
        }
        let path_for = |depth: usize| -> PathBuf {
            let mut path = container.to_path_buf();
            path.extend(&components[..depth]);
            path
        };

        // Walk up until some mkdir lands, then back down.
        let mut depth = components.len();
        loop {
            match self.make_directory(&path_for(depth))? {
                MkdirOutcome::Created | MkdirOutcome::Existed => break,
                MkdirOutcome::ParentMissing => {
                    depth -= 1;
                    if depth == 0 {
                        return Err(StorageError::ContainerNotFound {
                            container: container.display().to_string(),
                        });
                    }
                }
            }
        }
        for d in depth + 1..=components.len() {
            if self.make_directory(&path_for(d))? == MkdirOutcome::ParentMissing {
                return Err(StorageError::ContainerGone {
                    path: container.to_path_buf(),
                });
            }
        }

        let Some(metadata) = metadata else {
            return Ok(None);
        };
        let leaf = path_for(components.len());
        let target = XattrTarget::Path(&leaf);
        let mut merged = self.codec.read(target)?;
        merged.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.codec.write(target, &merged)?;
        Ok(Some(merged))
    }
}

/// Exclusive flock on the parent of `path`, released on drop.
fn lock_parent(path: &Path) -> Result<Option<File>, FsError> {
    let Some(parent) = path.parent() else {
        return Ok(None);
    };
    let file = match File::open(parent) {
        Ok(file) => file,
        // Let the mkdir itself report the missing parent.
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(None),
        Err(e) => return Err(FsError::new("open", parent, e)),
    };
    do_flock(&file, parent, false)?;
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::keys::*;
    use crate::test_support::scratch_dir;
    use std::fs;

    fn marker() -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(X_TYPE.into(), OBJECT.into());
        meta.insert(X_OBJECT_TYPE.into(), DIR_OBJECT.into());
        meta
    }

    #[test]
    fn test_create_dir_chain_marks_only_leaf() {
        let dir = scratch_dir();
        let container = dir.path().join("c");
        fs::create_dir(&container).unwrap();
        let model = DirModel::default();

        let written = model
            .create_dir_chain(&container, Path::new("a/b/c"), Some(&marker()))
            .unwrap()
            .unwrap();
        assert_eq!(written.get(X_OBJECT_TYPE).map(String::as_str), Some(DIR_OBJECT));
        assert!(!model.is_dir_object(&container.join("a")).unwrap());
        assert!(!model.is_dir_object(&container.join("a/b")).unwrap());
        assert!(model.is_dir_object(&container.join("a/b/c")).unwrap());
    }

    #[test]
    fn test_create_dir_chain_over_file() {
        let dir = scratch_dir();
        let container = dir.path().join("c");
        fs::create_dir(&container).unwrap();
        fs::write(container.join("a"), b"file").unwrap();
        let err = DirModel::default()
            .create_dir_chain(&container, Path::new("a/b"), None)
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExistsAsFile { .. }));
    }

    #[test]
    fn test_create_dir_chain_missing_container() {
        let dir = scratch_dir();
        let err = DirModel::default()
            .create_dir_chain(&dir.path().join("nope"), Path::new("a/b"), None)
            .unwrap_err();
        assert!(matches!(err, StorageError::ContainerNotFound { .. }));
    }

    #[test]
    fn test_create_dir_chain_marks_existing_directory() {
        let dir = scratch_dir();
        let container = dir.path().join("c");
        fs::create_dir_all(container.join("d")).unwrap();
        let model = DirModel::default();
        model
            .create_dir_chain(&container, Path::new("d"), Some(&marker()))
            .unwrap();
        assert!(model.is_dir_object(&container.join("d")).unwrap());
    }

    #[test]
    fn test_rmobjdir_removes_gratuitous_tree() {
        let dir = scratch_dir();
        let root = dir.path().join("x");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        assert!(DirModel::default().rmobjdir(&root, true).unwrap());
        assert!(!root.exists());
    }

    #[test]
    fn test_rmobjdir_stops_at_file_and_marker() {
        let dir = scratch_dir();
        let model = DirModel::default();

        let with_file = dir.path().join("f");
        fs::create_dir_all(with_file.join("a")).unwrap();
        fs::write(with_file.join("a/obj"), b"1").unwrap();
        assert!(!model.rmobjdir(&with_file, true).unwrap());
        assert!(with_file.join("a/obj").exists());

        let with_marker = dir.path().join("m");
        fs::create_dir_all(with_marker.join("a/keep")).unwrap();
        model
            .codec
            .write(XattrTarget::Path(&with_marker.join("a/keep")), &marker())
            .unwrap();
        assert!(!model.rmobjdir(&with_marker, true).unwrap());
        assert!(with_marker.join("a/keep").exists());

        // Without the marker check the marker is just a directory.
        assert!(model.rmobjdir(&with_marker, false).unwrap());
        assert!(!with_marker.exists());
    }

    #[test]
    fn test_rmobjdir_missing_is_success() {
        let dir = scratch_dir();
        assert!(DirModel::default()
            .rmobjdir(&dir.path().join("gone"), true)
            .unwrap());
    }

    #[test]
    fn test_prune_ancestors() {
        let dir = scratch_dir();
        let container = dir.path().join("c");
        fs::create_dir_all(container.join("keep/a/b")).unwrap();
        let model = DirModel::default();
        model
            .codec
            .write(XattrTarget::Path(&container.join("keep")), &marker())
            .unwrap();

        model
            .prune_ancestors(&container.join("keep/a/b"), &container)
            .unwrap();
        assert!(!container.join("keep/a").exists());
        assert!(container.join("keep").exists());
        assert!(container.exists());
    }

    #[test]
    fn test_prune_ancestors_stops_at_non_empty() {
        let dir = scratch_dir();
        let container = dir.path().join("c");
        fs::create_dir_all(container.join("a/b")).unwrap();
        fs::write(container.join("a/sibling"), b"1").unwrap();
        DirModel::default()
            .prune_ancestors(&container.join("a/b"), &container)
            .unwrap();
        assert!(!container.join("a/b").exists());
        assert!(container.join("a/sibling").exists());
    }

    #[test]
    fn test_make_directory_with_locking() {
        let dir = scratch_dir();
        let model = DirModel {
            mkdir_locking: true,
            ..DirModel::default()
        };
        let path = dir.path().join("locked");
        assert_eq!(model.make_directory(&path).unwrap(), MkdirOutcome::Created);
        assert_eq!(model.make_directory(&path).unwrap(), MkdirOutcome::Existed);
    }
}
