//! Data layer for immistat.
//!
//! Loads and cleans the wide statistics CSV, reshapes it into tidy records
//! and pivot tables, and describes datasets and selections.

pub mod aggregator;
pub mod analysis;
pub mod reader;

pub use immistat_core as core;
