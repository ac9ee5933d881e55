//! Error types for the playout engine
//!
//! Command-level failures (validation, not found, refused transport) use
//! [`playout_common::Error`] so they can be returned to the originator as
//! FAIL replies. This type covers the engine's own concerns.

use thiserror::Error;

/// Main error type for the playout engine
#[derive(Error, Debug)]
pub enum Error {
    /// Shared-library error (state store, plan model, protocol)
    #[error(transparent)]
    Common(#[from] playout_common::Error),

    /// Audio engine refused or failed an operation
    #[error("Audio engine error: {0}")]
    Audio(String),

    /// Channel number outside the configured range
    #[error("Unknown channel: {0}")]
    UnknownChannel(u8),

    /// Execution unit has exited or its queue is closed
    #[error("Unit unavailable: {0}")]
    UnitUnavailable(String),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
