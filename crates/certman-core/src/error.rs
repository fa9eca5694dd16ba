//! Errors raised while resolving certman configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for [`crate::Config`].
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A resolved setting the manager cannot run with.
    #[error("Configuration error: {0}")]
    Config(String),
}
