//! Runtime layer for immistat.
//!
//! Owns the loaded dataset as an atomically swappable snapshot, exposes the
//! read-only query façade, and watches the source file for changes.

pub mod query;
pub mod store;
pub mod watcher;

pub use immistat_core as core;
pub use immistat_data as data;
