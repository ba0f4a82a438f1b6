//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the client settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// Merged values do not fit the settings schema.
    #[error("settings do not match the expected shape: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range or inconsistent with another.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
