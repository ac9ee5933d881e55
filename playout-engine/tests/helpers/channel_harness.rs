//! Synchronous channel controller harness
//!
//! The controller is driven directly through `handle_line` and
//! `handle_report`; the primary player is a bare command queue the test
//! inspects, and player reports are fabricated.

use playout_common::message::Outbound;
use playout_common::plan::PlanItem;
use playout_common::{Error, Result};
use playout_engine::channel::{ChannelController, ChannelSettings};
use playout_engine::plan_source::PlanSource;
use playout_engine::player::{PlayerCommand, PlayerLink, PlayerReport, PlayerStatus};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Plan source with no plans at all
pub struct NoPlans;

impl PlanSource for NoPlans {
    fn fetch(&self, show_id: &str) -> Result<Vec<PlanItem>> {
        Err(Error::NotFound(format!("show plan {}", show_id)))
    }
}

/// Channel 0, primary player 0, no position rate limit
pub fn settings(state_dir: &Path) -> ChannelSettings {
    ChannelSettings {
        channel: 0,
        primary_player: 0,
        state_dir: state_dir.to_path_buf(),
        poll_interval: Duration::from_millis(20),
        position_persist_interval: Duration::ZERO,
    }
}

/// JSON for an ADD command: a 30 second library track appended to the plan
pub fn item_json(id: &str, title: &str) -> String {
    json!({ "id": id, "title": title, "trackid": 100, "length": 30.0 }).to_string()
}

pub struct ChannelHarness {
    pub controller: ChannelController,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub player: mpsc::UnboundedReceiver<PlayerCommand>,
}

impl ChannelHarness {
    pub fn open(state_dir: &Path) -> Self {
        Self::open_with(state_dir, Arc::new(NoPlans))
    }

    pub fn open_with(state_dir: &Path, plans: Arc<dyn PlanSource>) -> Self {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let mut controller = ChannelController::open(settings(state_dir), outbound_tx, plans);
        let (player_tx, player) = mpsc::unbounded_channel();
        controller.attach(PlayerLink::new(0, player_tx));
        Self {
            controller,
            outbound,
            player,
        }
    }

    /// Apply one wire line and return the replies it produced
    pub fn send(&mut self, line: &str) -> Vec<String> {
        self.take_outbound();
        self.controller.handle_line(line);
        self.take_outbound()
            .iter()
            .filter(|msg| msg.is_reply())
            .map(Outbound::to_wire)
            .collect()
    }

    /// Send a line that must produce exactly one reply, and return it
    pub fn reply(&mut self, line: &str) -> String {
        let mut replies = self.send(line);
        assert_eq!(replies.len(), 1, "expected one reply to {}, got {:?}", line, replies);
        replies.remove(0)
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn take_player(&mut self) -> Vec<PlayerCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.player.try_recv() {
            commands.push(command);
        }
        commands
    }

    /// Report a primary status built from a loaded, initialised player
    pub fn report(&mut self, edit: impl FnOnce(&mut PlayerStatus)) {
        let status = self.status(edit);
        self.controller.handle_report(0, PlayerReport::status(status));
    }

    /// Report that the loaded item played to its end
    pub fn end_item(&mut self) {
        let status = self.status(|_| {});
        self.controller.handle_report(0, PlayerReport::ended(status));
    }

    pub fn loaded_id(&self) -> Option<String> {
        self.controller.loaded_item().map(|item| item.id.clone())
    }

    pub fn loaded_weight(&self) -> Option<i64> {
        self.controller.loaded_item().map(|item| item.weight)
    }

    pub fn plan_ids(&self) -> Vec<String> {
        self.controller.plan().iter().map(|item| item.id.clone()).collect()
    }

    /// Current stored value of a channel state key
    pub fn stored(&self, key: &str) -> Value {
        self.controller.state().get(key).cloned().unwrap_or(Value::Null)
    }

    fn status(&self, edit: impl FnOnce(&mut PlayerStatus)) -> PlayerStatus {
        let mut status = PlayerStatus::new(0);
        status.initialised = true;
        status.loaded_item = self.controller.loaded_item().cloned();
        status.loaded = status.loaded_item.is_some();
        status.length = status.loaded_item.as_ref().map(|item| item.length).unwrap_or(0.0);
        edit(&mut status);
        status
    }
}
