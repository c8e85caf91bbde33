//! Typed filesystem errors.
//!
//! Every wrapped syscall in [`super::ops`] reports failures as an
//! [`FsError`].  The variant tells callers which *kind* of failure they
//! are looking at; the raw errno is still available through
//! [`FsError::errno`] for the call sites that branch on it.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A failed filesystem operation.
#[derive(Debug, Error)]
pub enum FsError {
    /// Generic OS error (anything that is neither out-of-space nor `EIO`).
    #[error("{op}({path}) failed: {source}")]
    Os {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `ENOSPC` or `EDQUOT`.
    #[error("{op}({path}): no space left on device: {source}")]
    NoSpace {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `EIO`, usually surfaced by the FUSE transport.
    #[error("{op}({path}): I/O error: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// Classify `source` into one of the three kinds.
    pub fn new(op: &'static str, path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.raw_os_error() {
            Some(libc::ENOSPC) | Some(libc::EDQUOT) => FsError::NoSpace { op, path, source },
            Some(libc::EIO) => FsError::Io { op, path, source },
            _ => FsError::Os { op, path, source },
        }
    }

    /// Raw errno of the underlying error, if it came from the OS.
    pub fn errno(&self) -> Option<i32> {
        self.source_io().raw_os_error()
    }

    /// The operation that failed (`"open"`, `"rename"`, ...).
    pub fn op(&self) -> &'static str {
        match self {
            FsError::Os { op, .. } | FsError::NoSpace { op, .. } | FsError::Io { op, .. } => op,
        }
    }

    /// The path the operation was applied to.
    pub fn path(&self) -> &Path {
        match self {
            FsError::Os { path, .. } | FsError::NoSpace { path, .. } | FsError::Io { path, .. } => {
                path
            }
        }
    }

    pub fn source_io(&self) -> &io::Error {
        match self {
            FsError::Os { source, .. }
            | FsError::NoSpace { source, .. }
            | FsError::Io { source, .. } => source,
        }
    }

    /// True for `ENOENT`.
    pub fn is_not_found(&self) -> bool {
        self.errno() == Some(libc::ENOENT)
    }

    /// True for `ENOENT` or `ESTALE`, the two errors a concurrent delete on
    /// a shared filesystem can produce.
    pub fn is_vanished(&self) -> bool {
        matches!(self.errno(), Some(libc::ENOENT) | Some(libc::ESTALE))
    }

    pub fn is_no_space(&self) -> bool {
        matches!(self, FsError::NoSpace { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_no_space() {
        for errno in [libc::ENOSPC, libc::EDQUOT] {
            let err = FsError::new("write", Path::new("/x"), io::Error::from_raw_os_error(errno));
            assert!(err.is_no_space());
            assert_eq!(err.errno(), Some(errno));
        }
    }

    #[test]
    fn test_classify_io() {
        let err = FsError::new("stat", Path::new("/x"), io::Error::from_raw_os_error(libc::EIO));
        assert!(matches!(err, FsError::Io { .. }));
        assert_eq!(err.op(), "stat");
        assert_eq!(err.path(), Path::new("/x"));
    }

    #[test]
    fn test_classify_generic() {
        let err = FsError::new(
            "open",
            Path::new("/x"),
            io::Error::from_raw_os_error(libc::ENOENT),
        );
        assert!(matches!(err, FsError::Os { .. }));
        assert!(err.is_not_found());
        assert!(err.is_vanished());

        let stale = FsError::new("open", Path::new("/x"), io::Error::from_raw_os_error(libc::ESTALE));
        assert!(stale.is_vanished());
        assert!(!stale.is_not_found());
    }
}
