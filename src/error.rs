//! Error types for the media relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error types that can occur while relaying a media object
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Origin unavailable: {0}")]
    OriginUnavailable(String),

    #[error("Unsatisfiable range: {0}")]
    UnsatisfiableRange(String),

    #[error("Stream relay failed: {0}")]
    RelayFailed(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Io(err.to_string())
    }
}

impl RelayError {
    /// Convert error to HTTP status code
    ///
    /// Client faults map to 4xx, a failed stream relay maps to 502 Bad
    /// Gateway, and everything else (origin unreachable included) to 500.
    pub fn to_http_status(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::NotFound(_) => 404,
            RelayError::UnsatisfiableRange(_) => 416,
            RelayError::RelayFailed(_) => 502,
            RelayError::OriginUnavailable(_) => 500,
            RelayError::Cache(_) => 500,
            RelayError::Config(_) => 500,
            RelayError::Io(_) => 500,
            RelayError::Internal(_) => 500,
        }
    }

    /// Short diagnostic body sent to the client alongside the status
    pub fn client_message(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "Invalid File ID",
            RelayError::NotFound(_) => "File Not Found",
            RelayError::UnsatisfiableRange(_) => "Range Not Satisfiable",
            RelayError::RelayFailed(_) => "Failed to stream file",
            RelayError::OriginUnavailable(_) => "Failed to fetch file from origin",
            RelayError::Cache(_)
            | RelayError::Config(_)
            | RelayError::Io(_)
            | RelayError::Internal(_) => "Internal Server Error",
        }
    }

    /// Categorize a non-success origin status seen while streaming
    pub fn from_stream_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => RelayError::NotFound(message),
            416 => RelayError::UnsatisfiableRange(message),
            _ => RelayError::RelayFailed(format!("origin returned {}: {}", status, message)),
        }
    }
}
