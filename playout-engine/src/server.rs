//! Server-wide state
//!
//! Written by the supervisor when it starts and stops, and read by other
//! local processes (health checks, `playout inspect`) from its snapshot.

use playout_common::time::now_rfc3339;
use playout_common::StateMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// State store name for the server state
pub const SERVER_STATE_NAME: &str = "server";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerState {
    pub server_name: String,
    pub channels: u8,
    pub players_per_channel: u8,
    /// Fresh for every start
    pub session_id: Uuid,
    pub started_at: String,
    pub running: bool,
}

impl ServerState {
    /// State for a session starting now
    pub fn starting(server_name: &str, channels: u8, players_per_channel: u8) -> Self {
        Self {
            server_name: server_name.to_string(),
            channels,
            players_per_channel,
            session_id: Uuid::new_v4(),
            started_at: now_rfc3339(),
            running: false,
        }
    }

    pub fn to_map(&self) -> StateMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => StateMap::new(),
        }
    }
}
