//! Error types for the `OpenClaw` core library.

use thiserror::Error;

/// Result type alias using the `OpenClaw` core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `OpenClaw` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// CLI output parsing error
    #[error("Failed to parse CLI output: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No backend is configured under the requested provider name
    #[error("Unknown backend: {provider}")]
    UnknownBackend { provider: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
