//! Shared model for immistat.
//!
//! Holds the error taxonomy, the cleaned/tidy data model, the dataset schema
//! configuration, the backlog estimator, number formatting and CLI settings.

pub mod error;
pub mod estimator;
pub mod formatting;
pub mod models;
pub mod schema;
pub mod settings;

pub use error::{Result, StatError};
