//! Extended-attribute calls on a path or an open file.

use std::ffi::CString;
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use super::error::FsError;
use super::ratelimit::warn_rate_limited;

/// Largest value a single attribute key may hold.
pub const MAX_XATTR_SIZE: usize = 65_536;

/// What an attribute call is applied to.
#[derive(Debug, Clone, Copy)]
pub enum XattrTarget<'a> {
    Path(&'a Path),
    Fd(&'a File),
}

impl XattrTarget<'_> {
    /// Best-effort file name for logs and errors.  For an fd this is the
    /// `/proc/self/fd` link target.
    pub fn describe(&self) -> PathBuf {
        match self {
            XattrTarget::Path(path) => path.to_path_buf(),
            XattrTarget::Fd(file) => {
                let fd = file.as_raw_fd();
                fs::read_link(format!("/proc/self/fd/{fd}"))
                    .unwrap_or_else(|_| PathBuf::from(format!("<fd {fd}>")))
            }
        }
    }
}

fn c_string(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

fn fail(op: &'static str, target: XattrTarget<'_>, err: io::Error) -> FsError {
    let err = FsError::new(op, &target.describe(), err);
    if err.is_no_space() {
        warn_rate_limited(&format!(
            "{op}: no space left on device writing metadata of {}",
            err.path().display()
        ));
    }
    err
}

/// Read attribute `name`.  `Ok(None)` when the attribute is absent.
pub fn get_xattr(target: XattrTarget<'_>, name: &str) -> Result<Option<Vec<u8>>, FsError> {
    let cname = c_string(name.as_bytes()).map_err(|e| fail("getxattr", target, e))?;
    let mut buf = vec![0u8; MAX_XATTR_SIZE];
    let rc = match target {
        XattrTarget::Path(path) => {
            let cpath =
                c_string(path.as_os_str().as_bytes()).map_err(|e| fail("getxattr", target, e))?;
            // SAFETY: `buf` is valid for `buf.len()` bytes and both strings
            // are NUL-terminated.
            unsafe {
                libc::getxattr(
                    cpath.as_ptr(),
                    cname.as_ptr(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            }
        }
        // SAFETY: as above; the fd is owned by `file`.
        XattrTarget::Fd(file) => unsafe {
            libc::fgetxattr(
                file.as_raw_fd(),
                cname.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        },
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODATA) {
            return Ok(None);
        }
        return Err(fail("getxattr", target, err));
    }
    buf.truncate(rc as usize);
    Ok(Some(buf))
}

/// Create or replace attribute `name`.
pub fn set_xattr(target: XattrTarget<'_>, name: &str, value: &[u8]) -> Result<(), FsError> {
    let cname = c_string(name.as_bytes()).map_err(|e| fail("setxattr", target, e))?;
    let rc = match target {
        XattrTarget::Path(path) => {
            let cpath =
                c_string(path.as_os_str().as_bytes()).map_err(|e| fail("setxattr", target, e))?;
            // SAFETY: `value` is valid for `value.len()` bytes.
            unsafe {
                libc::setxattr(
                    cpath.as_ptr(),
                    cname.as_ptr(),
                    value.as_ptr().cast(),
                    value.len(),
                    0,
                )
            }
        }
        // SAFETY: as above; the fd is owned by `file`.
        XattrTarget::Fd(file) => unsafe {
            libc::fsetxattr(
                file.as_raw_fd(),
                cname.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                0,
            )
        },
    };
    if rc < 0 {
        return Err(fail("setxattr", target, io::Error::last_os_error()));
    }
    Ok(())
}

/// Remove attribute `name`.  Returns false when it was not present.
pub fn remove_xattr(target: XattrTarget<'_>, name: &str) -> Result<bool, FsError> {
    let cname = c_string(name.as_bytes()).map_err(|e| fail("removexattr", target, e))?;
    let rc = match target {
        XattrTarget::Path(path) => {
            let cpath =
                c_string(path.as_os_str().as_bytes()).map_err(|e| fail("removexattr", target, e))?;
            // SAFETY: both strings are NUL-terminated.
            unsafe { libc::removexattr(cpath.as_ptr(), cname.as_ptr()) }
        }
        // SAFETY: the fd is owned by `file`.
        XattrTarget::Fd(file) => unsafe { libc::fremovexattr(file.as_raw_fd(), cname.as_ptr()) },
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODATA) {
            return Ok(false);
        }
        return Err(fail("removexattr", target, err));
    }
    Ok(true)
}

/// True when `dir` accepts `user.` attributes.  tmpfs on older kernels and
/// some overlay setups do not.
pub fn supports_user_xattrs(dir: &Path) -> bool {
    let probe = dir.join(".xattr-probe");
    if fs::write(&probe, b"").is_err() {
        return false;
    }
    let ok = set_xattr(XattrTarget::Path(&probe), "user.posixstore.probe", b"1").is_ok();
    let _ = fs::remove_file(&probe);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_path_roundtrip_and_remove() {
        let dir = scratch_dir();
        let path = dir.path().join("f");
        fs::write(&path, b"x").unwrap();
        let target = XattrTarget::Path(&path);

        assert_eq!(get_xattr(target, "user.k").unwrap(), None);
        set_xattr(target, "user.k", b"value").unwrap();
        assert_eq!(get_xattr(target, "user.k").unwrap(), Some(b"value".to_vec()));
        assert!(remove_xattr(target, "user.k").unwrap());
        assert!(!remove_xattr(target, "user.k").unwrap());
    }

    #[test]
    fn test_fd_target() {
        let dir = scratch_dir();
        let path = dir.path().join("f");
        let file = File::create(&path).unwrap();
        set_xattr(XattrTarget::Fd(&file), "user.k", b"v").unwrap();
        assert_eq!(
            get_xattr(XattrTarget::Path(&path), "user.k").unwrap(),
            Some(b"v".to_vec())
        );
        assert_eq!(
            XattrTarget::Fd(&file).describe(),
            path.canonicalize().unwrap()
        );
    }

    #[test]
    fn test_missing_path_is_error() {
        let dir = scratch_dir();
        let path = dir.path().join("missing");
        let err = get_xattr(XattrTarget::Path(&path), "user.k").unwrap_err();
        assert!(err.is_not_found());
    }
}
