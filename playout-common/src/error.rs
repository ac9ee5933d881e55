//! Common error types for the playout core

use thiserror::Error;

/// Common result type for playout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the playout crates
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed marker or plan item input, rejected before anything is applied
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Command referenced a plan entry that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Message source tag is not one of the recognised values
    #[error("Unknown message source: {0}")]
    UnknownSource(String),

    /// Command name not recognised, or its arguments could not be decoded
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Transport refused the operation in its current state (e.g. load while playing)
    #[error("Transport refused: {0}")]
    TransportRefused(String),

    /// Durable snapshot could not be read or written
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A state-change callback failed
    #[error("Callback failure: {0}")]
    Callback(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue to another execution unit is closed
    #[error("Channel closed: {0}")]
    Channel(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a validation error on a named field
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
