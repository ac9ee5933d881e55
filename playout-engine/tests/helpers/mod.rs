//! Test helper modules for playout engine integration tests
//!
//! Provides reusable test infrastructure components:
//! - ChannelHarness: drive a ChannelController synchronously with a fake primary player
//! - Plan item JSON builders and plan source stubs

#![allow(dead_code)]

pub mod channel_harness;

pub use channel_harness::{item_json, settings, ChannelHarness, NoPlans};
