//! Object storage engine.
//!
//! The [`backend::StorageBackend`] trait is what the HTTP layer sees.
//! [`posix::PosixBackend`] implements it with the directory model
//! ([`dirs`]), the object engine ([`diskfile`]), and the listing engine
//! ([`listing`]).

pub mod backend;
pub mod dirs;
pub mod diskfile;
pub mod error;
pub mod listing;
pub mod posix;

pub use error::StorageError;
