//! # Playout Engine Library
//!
//! Channel controllers, player units, the message router and the process
//! supervisor that owns them.
//!
//! **Architecture:** one tokio task per channel controller, one per player
//! unit, and one router task. Units talk only through `tokio::sync::mpsc`
//! queues and stop on a shared `tokio::sync::watch` shutdown signal. Durable
//! state lives in per-unit [`playout_common::StateStore`] snapshots.

pub mod channel;
pub mod error;
pub mod files;
pub mod hardware;
pub mod plan_source;
pub mod player;
pub mod router;
pub mod server;
pub mod supervisor;

pub use channel::ChannelController;
pub use error::{Error, Result};
pub use router::MessageRouter;
pub use supervisor::ProcessSupervisor;
