//! Shared helpers for unit tests.

use std::path::Path;

use tempfile::TempDir;

use crate::fs::xattr::supports_user_xattrs;

/// A scratch directory on a filesystem that accepts `user.` attributes.
///
/// The system temp dir is tried first; tmpfs without xattr support falls
/// back to the build directory, which normally sits on a disk filesystem.
pub fn scratch_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    if supports_user_xattrs(dir.path()) {
        return dir;
    }
    let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("target");
    std::fs::create_dir_all(&base).expect("create target dir");
    tempfile::tempdir_in(base).expect("create temp dir under target")
}
