//! Wrapped filesystem calls.
//!
//! Each wrapper converts `io::Error` into a typed [`FsError`] carrying the
//! operation name and path, and reports out-of-space conditions through
//! the rate-limited logger.  `stat` additionally retries transient `EIO`
//! from the FUSE transport.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::error::FsError;
use super::ratelimit::warn_rate_limited;
use crate::metrics::FS_RETRIES_TOTAL;

/// Number of attempts `do_stat` makes before giving up on `EIO`.
pub const STAT_ATTEMPTS: usize = 10;

fn wrap<T>(op: &'static str, path: &Path, res: io::Result<T>) -> Result<T, FsError> {
    res.map_err(|source| {
        let err = FsError::new(op, path, source);
        if err.is_no_space() {
            warn_rate_limited(&format!(
                "{op}: no space left on device writing {}",
                path.display()
            ));
        }
        err
    })
}

/// Sleep for a random duration in `[min_ms, max_ms]` milliseconds.
pub fn random_sleep(min_ms: u64, max_ms: u64) {
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    thread::sleep(Duration::from_millis(ms));
}

pub fn do_open(path: &Path, options: &OpenOptions) -> Result<File, FsError> {
    wrap("open", path, options.open(path))
}

/// Write all of `buf`, returning the number of bytes written.
pub fn do_write(file: &mut File, path: &Path, buf: &[u8]) -> Result<usize, FsError> {
    wrap("write", path, file.write_all(buf))?;
    Ok(buf.len())
}

pub fn do_read(file: &mut File, path: &Path, buf: &mut [u8]) -> Result<usize, FsError> {
    loop {
        match file.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            res => return wrap("read", path, res),
        }
    }
}

fn stat_with_retry(
    op: &'static str,
    path: &Path,
    call: impl Fn(&Path) -> io::Result<fs::Metadata>,
) -> Result<Option<fs::Metadata>, FsError> {
    let mut last_err = None;
    for attempt in 0..STAT_ATTEMPTS {
        match call(path) {
            Ok(meta) => {
                if attempt > 0 {
                    warn!("{op}({}) succeeded after {attempt} retries", path.display());
                }
                return Ok(Some(meta));
            }
            Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                metrics::counter!(FS_RETRIES_TOTAL, "op" => op).increment(1);
                last_err = Some(e);
                random_sleep(1, 5);
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => return Ok(None),
            Err(e) => return Err(FsError::new(op, path, e)),
        }
    }
    let source = last_err.unwrap_or_else(|| io::Error::from_raw_os_error(libc::EIO));
    Err(FsError::new(op, path, source))
}

/// `stat(2)`, following symlinks.  `Ok(None)` when the path does not exist.
pub fn do_stat(path: &Path) -> Result<Option<fs::Metadata>, FsError> {
    stat_with_retry("stat", path, |p| fs::metadata(p))
}

/// `lstat(2)`.  `Ok(None)` when the path does not exist.
pub fn do_lstat(path: &Path) -> Result<Option<fs::Metadata>, FsError> {
    stat_with_retry("lstat", path, |p| fs::symlink_metadata(p))
}

pub fn do_fstat(file: &File, path: &Path) -> Result<fs::Metadata, FsError> {
    wrap("fstat", path, file.metadata())
}

pub fn do_mkdir(path: &Path) -> Result<(), FsError> {
    wrap(
        "mkdir",
        path,
        fs::DirBuilder::new().mode(0o755).create(path),
    )
}

pub fn do_rmdir(path: &Path) -> Result<(), FsError> {
    wrap("rmdir", path, fs::remove_dir(path))
}

/// `unlink(2)`; a missing file is not an error.
pub fn do_unlink(path: &Path) -> Result<(), FsError> {
    match fs::remove_file(path) {
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
        res => wrap("unlink", path, res),
    }
}

pub fn do_rename(from: &Path, to: &Path) -> Result<(), FsError> {
    wrap("rename", from, fs::rename(from, to))
}

pub fn do_fsync(file: &File, path: &Path) -> Result<(), FsError> {
    wrap("fsync", path, file.sync_all())
}

pub fn do_fdatasync(file: &File, path: &Path) -> Result<(), FsError> {
    wrap("fdatasync", path, file.sync_data())
}

/// `chown(2)`; a no-op when neither owner nor group is given.
pub fn do_chown(path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<(), FsError> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    wrap("chown", path, std::os::unix::fs::chown(path, uid, gid))
}

/// `fchown(2)`; a no-op when neither owner nor group is given.
pub fn do_fchown(
    file: &File,
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
) -> Result<(), FsError> {
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    wrap("fchown", path, std::os::unix::fs::fchown(file, uid, gid))
}

/// Names of the entries in `path`, unsorted.  Non-UTF-8 names are skipped.
pub fn do_listdir(path: &Path) -> Result<Vec<String>, FsError> {
    let entries = wrap("listdir", path, fs::read_dir(path))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = wrap("listdir", path, entry)?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => debug!("skipping non-UTF-8 entry {:?} in {}", raw, path.display()),
        }
    }
    Ok(names)
}

/// One directory visited by [`do_walk`].
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub dir: PathBuf,
    /// Subdirectory names, sorted.
    pub dirs: Vec<String>,
    /// Non-directory names, sorted.
    pub files: Vec<String>,
}

/// Recursively walk `top`, like `os.walk`.
///
/// With `top_down` a directory is reported before its children, otherwise
/// after them.  Subdirectories that vanish mid-walk are skipped; only a
/// failure to read `top` itself is an error.  Symlinks are never followed.
pub fn do_walk(top: &Path, top_down: bool) -> Result<Vec<WalkEntry>, FsError> {
    let mut out = Vec::new();
    walk_into(top, top_down, true, &mut out)?;
    Ok(out)
}

fn walk_into(
    dir: &Path,
    top_down: bool,
    is_root: bool,
    out: &mut Vec<WalkEntry>,
) -> Result<(), FsError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            let err = FsError::new("walk", dir, e);
            if !is_root && (err.is_vanished() || err.errno() == Some(libc::ENOTDIR)) {
                return Ok(());
            }
            return Err(err);
        }
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let err = FsError::new("walk", dir, e);
                if err.is_vanished() {
                    continue;
                }
                return Err(err);
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                debug!("skipping non-UTF-8 entry {:?} in {}", raw, dir.display());
                continue;
            }
        };
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => dirs.push(name),
            Ok(_) => files.push(name),
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::ESTALE)) => {}
            Err(e) => return Err(FsError::new("walk", &dir.join(&name), e)),
        }
    }
    dirs.sort();
    files.sort();

    if top_down {
        out.push(WalkEntry {
            dir: dir.to_path_buf(),
            dirs: dirs.clone(),
            files,
        });
        for name in &dirs {
            walk_into(&dir.join(name), top_down, false, out)?;
        }
    } else {
        for name in &dirs {
            walk_into(&dir.join(name), top_down, false, out)?;
        }
        out.push(WalkEntry {
            dir: dir.to_path_buf(),
            dirs,
            files,
        });
    }
    Ok(())
}

/// Advise the kernel to drop cached pages for `[offset, offset + len)`.
/// A `len` of zero means "to the end of the file".  Failures only get a
/// debug log; dropping cache is advisory.
pub fn drop_buffer_cache(file: &File, path: &Path, offset: u64, len: u64) {
    // SAFETY: the fd is owned by `file` and stays open for the call.
    let rc = unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        )
    };
    if rc != 0 {
        debug!(
            "posix_fadvise({}, {offset}, {len}) failed: {}",
            path.display(),
            io::Error::from_raw_os_error(rc)
        );
    }
}

/// Reserve `len` bytes for `file` without changing its visible size.
pub fn do_fallocate(file: &File, path: &Path, len: u64) -> Result<(), FsError> {
    // SAFETY: the fd is owned by `file` and stays open for the call.
    let rc = unsafe {
        libc::fallocate(
            file.as_raw_fd(),
            libc::FALLOC_FL_KEEP_SIZE,
            0,
            len as libc::off_t,
        )
    };
    if rc != 0 {
        return wrap("fallocate", path, Err(io::Error::last_os_error()));
    }
    Ok(())
}

/// Take an exclusive `flock(2)` on `file`.
pub fn do_flock(file: &File, path: &Path, nonblocking: bool) -> Result<(), FsError> {
    let mut op = libc::LOCK_EX;
    if nonblocking {
        op |= libc::LOCK_NB;
    }
    loop {
        // SAFETY: the fd is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return wrap("flock", path, Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(do_stat(&dir.path().join("nope")).unwrap().is_none());
        assert!(do_stat(dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_mkdir_twice_reports_eexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d");
        do_mkdir(&path).unwrap();
        let err = do_mkdir(&path).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EEXIST));
        assert_eq!(err.op(), "mkdir");
    }

    #[test]
    fn test_rmdir_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d");
        do_mkdir(&path).unwrap();
        fs::write(path.join("f"), b"x").unwrap();
        let err = do_rmdir(&path).unwrap_err();
        assert!(matches!(
            err.errno(),
            Some(libc::ENOTEMPTY) | Some(libc::EEXIST)
        ));
    }

    #[test]
    fn test_unlink_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        do_unlink(&dir.path().join("gone")).unwrap();
    }

    #[test]
    fn test_walk_orders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/f"), b"1").unwrap();
        fs::write(root.join("top"), b"2").unwrap();

        let top_down = do_walk(root, true).unwrap();
        assert_eq!(top_down[0].dir, root);
        assert_eq!(top_down[0].dirs, vec!["a".to_string()]);
        assert_eq!(top_down[0].files, vec!["top".to_string()]);
        assert_eq!(top_down[2].dir, root.join("a/b"));
        assert_eq!(top_down[2].files, vec!["f".to_string()]);

        let bottom_up = do_walk(root, false).unwrap();
        assert_eq!(bottom_up[0].dir, root.join("a/b"));
        assert_eq!(bottom_up.last().unwrap().dir, root);
    }

    #[test]
    fn test_walk_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = do_walk(&dir.path().join("missing"), true).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_listdir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x"), b"").unwrap();
        fs::create_dir(dir.path().join("y")).unwrap();
        let mut names = do_listdir(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_flock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let mut opts = OpenOptions::new();
        opts.create(true).write(true);
        let first = do_open(&path, &opts).unwrap();
        let second = do_open(&path, &opts).unwrap();
        do_flock(&first, &path, true).unwrap();
        let err = do_flock(&second, &path, true).unwrap_err();
        assert_eq!(err.errno(), Some(libc::EWOULDBLOCK));
        drop(first);
        do_flock(&second, &path, true).unwrap();
    }
}
