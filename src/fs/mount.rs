//! Mount points, per-worker mount slots, and the run directory.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::FsError;
use super::ops::{do_flock, do_lstat, do_open};

/// Name of the empty file kept in the run directory for callers that probe
/// for a legacy database path.
pub const SENTINEL_DB_FILE: &str = "db_file.db";

/// Number of numbered per-worker mount slots.
pub const WORKER_SLOTS: u32 = 200;

/// True when `path` is a mount point.
///
/// A symlink is never a mount point.  Otherwise `path` is a mount point
/// when it lives on a different device than its parent, or when it is its
/// own parent (`/`).  Any error reads as "not mounted".
pub fn ismount(path: &Path) -> bool {
    let stat_pair = || -> Result<Option<bool>, FsError> {
        let Some(meta) = do_lstat(path)? else {
            return Ok(None);
        };
        if meta.file_type().is_symlink() {
            return Ok(Some(false));
        }
        let Some(parent) = do_lstat(&path.join(".."))? else {
            return Ok(None);
        };
        Ok(Some(meta.dev() != parent.dev() || meta.ino() == parent.ino()))
    };
    match stat_pair() {
        Ok(answer) => answer.unwrap_or(false),
        Err(e) => {
            debug!("ismount({}): {e}", path.display());
            false
        }
    }
}

/// Poll `ismount(path)` up to `attempts` times, `interval` apart.
pub fn wait_for_mount(path: &Path, attempts: u32, interval: Duration) -> bool {
    for attempt in 0..attempts {
        if ismount(path) {
            return true;
        }
        if attempt + 1 < attempts {
            debug!("{} not mounted yet, waiting", path.display());
            thread::sleep(interval);
        }
    }
    false
}

fn open_lock_file(path: &Path) -> Result<File, FsError> {
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).write(true);
    do_open(path, &options)
}

/// Exclusive lock serialising mount setup for one device.
///
/// Held for as long as the value lives.
#[derive(Debug)]
pub struct MountLock {
    _file: File,
}

impl MountLock {
    /// Block until `run_dir/<device>.lock` is ours.
    pub fn acquire(run_dir: &Path, device: &str) -> Result<Self, FsError> {
        let path = run_dir.join(format!("{device}.lock"));
        let file = open_lock_file(&path)?;
        do_flock(&file, &path, false)?;
        Ok(Self { _file: file })
    }
}

/// A numbered per-worker mount slot, held for the life of the process.
#[derive(Debug)]
pub struct WorkerSlot {
    number: u32,
    _file: File,
}

impl WorkerSlot {
    /// Take the first free `run_dir/mnt_<n>.lock` for `n` in `0..slots`.
    /// `Ok(None)` when every slot is held by another process.
    pub fn acquire(run_dir: &Path, slots: u32) -> Result<Option<Self>, FsError> {
        for number in 0..slots {
            let path = run_dir.join(format!("mnt_{number}.lock"));
            let file = open_lock_file(&path)?;
            match do_flock(&file, &path, true) {
                Ok(()) => {
                    info!("claimed worker mount slot {number}");
                    return Ok(Some(Self {
                        number,
                        _file: file,
                    }));
                }
                Err(e) if e.errno() == Some(libc::EWOULDBLOCK) => continue,
                Err(e) => return Err(e),
            }
        }
        warn!("all {slots} worker mount slots in {} are taken", run_dir.display());
        Ok(None)
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

/// Create `run_dir` and the sentinel database file inside it.
pub fn prepare_run_dir(run_dir: &Path) -> Result<PathBuf, FsError> {
    std::fs::create_dir_all(run_dir).map_err(|e| FsError::new("mkdir", run_dir, e))?;
    let sentinel = run_dir.join(SENTINEL_DB_FILE);
    let mut options = OpenOptions::new();
    options.create(true).truncate(false).write(true);
    do_open(&sentinel, &options)?;
    Ok(sentinel)
}

/// Maps device names to directories under the devices root.
#[derive(Debug, Clone)]
pub struct MountLayout {
    devices: PathBuf,
    worker: Option<u32>,
    use_put_mount: bool,
}

impl MountLayout {
    pub fn new(devices: impl Into<PathBuf>, worker: Option<u32>, use_put_mount: bool) -> Self {
        Self {
            devices: devices.into(),
            worker,
            use_put_mount,
        }
    }

    pub fn devices(&self) -> &Path {
        &self.devices
    }

    /// Directory name for `device`, including the worker suffix.
    pub fn device_name(&self, device: &str) -> String {
        match self.worker {
            Some(n) => format!("{device}_{n}"),
            None => device.to_string(),
        }
    }

    /// Where reads, listings, and deletes look for `device`.
    pub fn device_path(&self, device: &str) -> PathBuf {
        self.devices.join(self.device_name(device))
    }

    /// Where writes for `device` land.
    pub fn put_device_path(&self, device: &str) -> PathBuf {
        if self.use_put_mount {
            self.devices
                .join(format!("{}_PUT", self.device_name(device)))
        } else {
            self.device_path(device)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_directory_is_not_a_mount() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("vol");
        std::fs::create_dir(&sub).unwrap();
        assert!(!ismount(&sub));
        assert!(!ismount(&dir.path().join("missing")));
    }

    #[test]
    fn test_root_is_a_mount() {
        assert!(ismount(Path::new("/")));
    }

    #[test]
    fn test_symlink_is_not_a_mount() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("root-link");
        std::os::unix::fs::symlink("/", &link).unwrap();
        assert!(!ismount(&link));
    }

    #[test]
    fn test_wait_for_mount_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!wait_for_mount(dir.path(), 2, Duration::from_millis(1)));
    }

    #[test]
    fn test_worker_slots_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let first = WorkerSlot::acquire(dir.path(), 3).unwrap().unwrap();
        let second = WorkerSlot::acquire(dir.path(), 3).unwrap().unwrap();
        assert_eq!(first.number(), 0);
        assert_eq!(second.number(), 1);
        drop(first);
        let third = WorkerSlot::acquire(dir.path(), 3).unwrap().unwrap();
        assert_eq!(third.number(), 0);
    }

    #[test]
    fn test_worker_slots_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let _only = WorkerSlot::acquire(dir.path(), 1).unwrap().unwrap();
        assert!(WorkerSlot::acquire(dir.path(), 1).unwrap().is_none());
    }

    #[test]
    fn test_prepare_run_dir_creates_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run/swift");
        let sentinel = prepare_run_dir(&run_dir).unwrap();
        assert_eq!(sentinel, run_dir.join("db_file.db"));
        assert!(sentinel.is_file());
        prepare_run_dir(&run_dir).unwrap();
    }

    #[test]
    fn test_mount_lock() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = MountLock::acquire(dir.path(), "vol").unwrap();
        assert!(dir.path().join("vol.lock").exists());
    }

    #[test]
    fn test_layout_paths() {
        let plain = MountLayout::new("/srv", None, false);
        assert_eq!(plain.device_path("vol"), PathBuf::from("/srv/vol"));
        assert_eq!(plain.put_device_path("vol"), PathBuf::from("/srv/vol"));

        let both = MountLayout::new("/srv", Some(7), true);
        assert_eq!(both.device_path("vol"), PathBuf::from("/srv/vol_7"));
        assert_eq!(both.put_device_path("vol"), PathBuf::from("/srv/vol_7_PUT"));
    }
}
