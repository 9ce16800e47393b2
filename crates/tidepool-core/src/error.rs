//! Error types for tidepool-core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Error, Debug)]
pub enum Error {
    /// JSON encode/decode failure
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was absent from a message or parameter map
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
