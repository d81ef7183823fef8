//! # skeldex
//!
//! Bookkeeping substrate for indexes that are pushed to, and pulled from, a
//! content-addressed store in pieces.
//!
//! Provides abort-aware progress tracking (`progress`), a scheduler that runs
//! a closure over submitted items on any executor (`scheduler`), splitting of
//! sorted key spaces at separators (`sorted`), and a range-wise push/pull of
//! ordered maps built on all three (`skeleton`).

pub mod archive;
pub mod config;
pub mod error;
pub mod progress;
pub mod scheduler;
pub mod skeleton;
pub mod sorted;
pub mod telemetry;

pub use error::{Error, Result};
