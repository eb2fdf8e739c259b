use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the immistat crates.
///
/// Only two classes are fatal to a load: I/O failures and data-format
/// failures. Per-cell problems never surface here; they become nulls and are
/// recorded as [`ParseWarning`](crate::models::ParseWarning)s instead.
#[derive(Error, Debug)]
pub enum StatError {
    /// The source file could not be opened or read.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required metadata column is absent from the header.
    #[error("Missing required column: {column}")]
    MissingColumn { column: String },

    /// The table does not have the expected shape.
    #[error("Schema mismatch: {0}")]
    Schema(String),

    /// The CSV framing itself is malformed.
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    /// A JSON document (schema file, last-used params) could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A month label did not match any recognised year-month format.
    #[error("Invalid month label: {0}")]
    MonthParse(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StatError {
    /// `true` for failures caused by the table's contents or shape.
    pub fn is_data_format(&self) -> bool {
        matches!(
            self,
            StatError::MissingColumn { .. } | StatError::Schema(_) | StatError::Csv(_)
        )
    }

    /// `true` for failures reading the file itself.
    pub fn is_io(&self) -> bool {
        match self {
            StatError::FileRead { .. } | StatError::Io(_) => true,
            StatError::Csv(e) => matches!(e.kind(), csv::ErrorKind::Io(_)),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the immistat crates.
pub type Result<T> = std::result::Result<T, StatError>;
