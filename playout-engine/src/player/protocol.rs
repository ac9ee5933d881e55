//! Messages between a channel controller and its player units

use playout_common::plan::PlanItem;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Transport command sent from a controller to one player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Load an item, replacing anything loaded
    Load(Box<PlanItem>),
    Unload,
    Play,
    Pause,
    Unpause,
    Stop,
    Seek(f64),
    /// Select an output device (`None` = default)
    Output(Option<String>),
    /// Native loop flag (repeat one)
    SetLoop(bool),
    /// Refresh markers of the loaded item without reloading audio
    UpdateItem(Box<PlanItem>),
    Quit,
}

/// What a report is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerVerb {
    Status,
    Load,
    Unload,
    Play,
    Pause,
    Unpause,
    Stop,
    Seek,
    Output,
    Loop,
    Update,
    /// Loaded item played to its end without looping
    Ended,
    Quit,
}

impl fmt::Display for PlayerVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&name)
    }
}

impl PlayerCommand {
    /// Verb acknowledging this command
    pub fn verb(&self) -> PlayerVerb {
        match self {
            PlayerCommand::Load(_) => PlayerVerb::Load,
            PlayerCommand::Unload => PlayerVerb::Unload,
            PlayerCommand::Play => PlayerVerb::Play,
            PlayerCommand::Pause => PlayerVerb::Pause,
            PlayerCommand::Unpause => PlayerVerb::Unpause,
            PlayerCommand::Stop => PlayerVerb::Stop,
            PlayerCommand::Seek(_) => PlayerVerb::Seek,
            PlayerCommand::Output(_) => PlayerVerb::Output,
            PlayerCommand::SetLoop(_) => PlayerVerb::Loop,
            PlayerCommand::UpdateItem(_) => PlayerVerb::Update,
            PlayerCommand::Quit => PlayerVerb::Quit,
        }
    }
}

/// Snapshot of one player's transport, regenerated every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub player: u8,
    pub initialised: bool,
    pub playing: bool,
    pub paused: bool,
    pub loaded: bool,
    /// Positioned on the item's cue point and not yet played
    pub cued: bool,
    /// Position rounded to a tenth of a second
    pub pos: f64,
    /// Position as reported by the audio engine
    pub pos_true: f64,
    pub remaining: f64,
    pub length: f64,
    pub loaded_item: Option<PlanItem>,
    pub output: Option<String>,
    #[serde(rename = "loop")]
    pub looping: bool,
}

impl PlayerStatus {
    pub fn new(player: u8) -> Self {
        Self {
            player,
            initialised: false,
            playing: false,
            paused: false,
            loaded: false,
            cued: false,
            pos: 0.0,
            pos_true: 0.0,
            remaining: 0.0,
            length: 0.0,
            loaded_item: None,
            output: None,
            looping: false,
        }
    }
}

/// Report sent from a player to its controller
///
/// Wire shape: `{"command": "STATUS", "status": true, "extra": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub command: PlayerVerb,
    /// Whether the command succeeded
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<PlayerStatus>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PlayerReport {
    pub fn status(status: PlayerStatus) -> Self {
        Self {
            command: PlayerVerb::Status,
            status: true,
            extra: Some(status),
            message: None,
        }
    }

    pub fn ack(command: PlayerVerb) -> Self {
        Self {
            command,
            status: true,
            extra: None,
            message: None,
        }
    }

    pub fn failed(command: PlayerVerb, reason: impl fmt::Display) -> Self {
        Self {
            command,
            status: false,
            extra: None,
            message: Some(reason.to_string()),
        }
    }

    pub fn ended(status: PlayerStatus) -> Self {
        Self {
            command: PlayerVerb::Ended,
            ..Self::status(status)
        }
    }
}

/// Reports from every player of a channel share one queue, tagged by player id
pub type ReportSender = mpsc::UnboundedSender<(u8, PlayerReport)>;
pub type ReportReceiver = mpsc::UnboundedReceiver<(u8, PlayerReport)>;

/// Controller-side handle to one player's command queue
#[derive(Debug, Clone)]
pub struct PlayerLink {
    id: u8,
    commands: mpsc::UnboundedSender<PlayerCommand>,
}

impl PlayerLink {
    pub fn new(id: u8, commands: mpsc::UnboundedSender<PlayerCommand>) -> Self {
        Self { id, commands }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::UnitUnavailable(format!("player {} command queue closed", self.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_wire_shape() {
        let report = PlayerReport::status(PlayerStatus::new(1));
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["command"], json!("STATUS"));
        assert_eq!(value["status"], json!(true));
        assert_eq!(value["extra"]["player"], json!(1));
        assert_eq!(value["extra"]["loop"], json!(false));
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_failed_report_round_trips_reason() {
        let report = PlayerReport::failed(PlayerVerb::Load, "file missing");
        let text = serde_json::to_string(&report).unwrap();
        assert!(text.contains("\"LOAD\""));

        let back: PlayerReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(PlayerVerb::Ended.to_string(), "ENDED");
        assert_eq!(PlayerCommand::SetLoop(true).verb(), PlayerVerb::Loop);
    }

    #[test]
    fn test_link_send_after_close_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = PlayerLink::new(2, tx);
        drop(rx);
        assert!(matches!(link.send(PlayerCommand::Play), Err(Error::UnitUnavailable(_))));
    }
}
