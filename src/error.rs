//! Chat Relay error types.
//!
//! Only two families of errors ever reach an HTTP caller: problems with the
//! inbound request body and upstream transport failures. Everything on the
//! diagnostic path (format detection, pretty-printing, usage extraction) is
//! absorbed where it happens and never reaches the caller.

use thiserror::Error;

/// Chat Relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration is missing or invalid. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// Inbound request body could not be read or parsed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network communication with the upstream failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered but its body could not be consumed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Server-side error (bind, serve).
    #[error("Server error: {0}")]
    Server(String),

    /// The client went away while a line was being forwarded.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Error `type` reported in the JSON error envelope sent to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) | RelayError::Json(_) => "invalid_request_error",
            _ => "proxy_error",
        }
    }
}
