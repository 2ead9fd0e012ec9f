//! Error types for imgharvest

use thiserror::Error;

/// imgharvest error type
///
/// Per-candidate download failures and duplicate detections are not errors;
/// they are recorded as [`crate::manifest::EntryStatus`] values in the
/// Manifest. Only adapter-level and configuration failures surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// The search source could not be reached after its own retry policy
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Invalid run configuration, rejected before any network activity
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed URL in a candidate or configuration
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for imgharvest operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
