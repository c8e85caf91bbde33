//! Swift API request handlers, one module per resource level.

pub mod account;
pub mod common;
pub mod container;
pub mod object;
