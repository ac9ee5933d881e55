//! Channel state as persisted and broadcast

use playout_common::message::RepeatMode;
use playout_common::plan::PlanItem;
use playout_common::StateMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::player::PlayerStatus;

/// Keys that change with playback position and are persisted at a limited rate
pub const POSITION_KEYS: [&str; 3] = ["pos", "pos_true", "remaining"];

/// State store name for a channel
pub fn state_name(channel: u8) -> String {
    format!("channel{}", channel)
}

/// Transport state derived from the primary player's last report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Empty,
    Loaded,
    Playing,
    Paused,
}

impl TransportState {
    pub fn of(status: &PlayerStatus) -> Self {
        if status.playing {
            TransportState::Playing
        } else if status.paused {
            TransportState::Paused
        } else if status.loaded {
            TransportState::Loaded
        } else {
            TransportState::Empty
        }
    }
}

/// Everything a channel persists
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub channel: u8,
    pub initialised: bool,
    pub show_plan: Vec<PlanItem>,
    pub loaded_item: Option<PlanItem>,
    pub primary_player: u8,
    pub playing: bool,
    pub paused: bool,
    pub loaded: bool,
    pub cued: bool,
    pub pos: f64,
    pub pos_true: f64,
    pub remaining: f64,
    pub length: f64,
    pub auto_advance: bool,
    pub repeat: RepeatMode,
    pub play_on_load: bool,
    pub output: Option<String>,
}

impl ChannelState {
    /// Fresh defaults for one channel
    pub fn defaults(channel: u8, primary_player: u8) -> Self {
        Self {
            channel,
            initialised: false,
            show_plan: Vec::new(),
            loaded_item: None,
            primary_player,
            playing: false,
            paused: false,
            loaded: false,
            cued: false,
            pos: 0.0,
            pos_true: 0.0,
            remaining: 0.0,
            length: 0.0,
            auto_advance: true,
            repeat: RepeatMode::None,
            play_on_load: false,
            output: None,
        }
    }

    pub fn to_map(&self) -> StateMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => StateMap::new(),
        }
    }

    /// Rebuild from a store mapping
    ///
    /// Keys that are missing or fail to decode keep their defaults; plan
    /// entries that fail validation are dropped.
    pub fn from_map(channel: u8, primary_player: u8, map: &StateMap) -> Self {
        let mut state = Self::defaults(channel, primary_player);

        if let Some(items) = map.get("show_plan").and_then(Value::as_array) {
            state.show_plan = items
                .iter()
                .filter_map(|raw| match PlanItem::from_value(raw) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Channel {}: dropping stored plan item: {}", channel, e);
                        None
                    }
                })
                .collect();
        }

        state.loaded_item = match map.get("loaded_item") {
            None | Some(Value::Null) => None,
            Some(raw) => match PlanItem::from_value(raw) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Channel {}: dropping stored loaded item: {}", channel, e);
                    None
                }
            },
        };

        macro_rules! restore {
            ($($key:ident),*) => {
                $(if let Some(v) = field(map, stringify!($key)) {
                    state.$key = v;
                })*
            };
        }
        restore!(
            initialised, playing, paused, loaded, cued, pos, pos_true, remaining, length,
            auto_advance, repeat, play_on_load, output
        );

        state
    }
}

fn field<T: DeserializeOwned>(map: &StateMap, key: &str) -> Option<T> {
    let value = map.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Stored channel key '{}' ignored: {}", key, e);
            None
        }
    }
}
