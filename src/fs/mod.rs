//! Filesystem primitives.
//!
//! Thin wrappers over the syscalls the engine uses.  They translate OS
//! errors into [`FsError`], retry transient `EIO` on `stat`, and report
//! out-of-space conditions through a rate-limited logger.

pub mod error;
pub mod mount;
pub mod ops;
pub mod ratelimit;
pub mod xattr;

pub use error::FsError;
