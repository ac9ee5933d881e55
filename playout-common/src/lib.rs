//! # Playout Common Library
//!
//! Shared code for the playout control core:
//! - Durable rate-limited state store
//! - Show-plan model (items, markers, weights)
//! - Inter-unit message protocol
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod message;
pub mod plan;
pub mod state_store;
pub mod time;

pub use error::{Error, Result};
pub use state_store::{StateMap, StateStore, UpdateOutcome};
