//! Error types for the Oxide S3 cache action.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Input required and not supplied: {0}")]
    MissingInput(String),

    #[error("Invalid value for input '{name}': {reason}")]
    InvalidInput { name: String, reason: String },

    // Resolution errors
    #[error("No cache object found for keys: {0:?}")]
    NotFound(Vec<String>),

    // Storage errors
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    // Fallback errors
    #[error("Cache fallback is not supported on {0}")]
    FallbackUnsupported(String),

    #[error("Fallback cache failed: {0}")]
    FallbackFailed(String),

    // Run state errors
    #[error("Run state missing: {0}")]
    StateMissing(String),

    // Archive errors
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Path validation error: none of the cache paths exist: {0:?}")]
    NoCachePaths(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration errors end the run with a failure; everything else is
    /// downgraded to a warning by the action entrypoints.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::MissingInput(_) | Error::InvalidInput { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
