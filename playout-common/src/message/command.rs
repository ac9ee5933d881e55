//! Inbound commands, decoded once at the channel boundary

use super::source::Source;
use crate::plan::{Marker, PlanItem};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel repeat policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    None,
    /// Loop the loaded item (handled natively by the player)
    One,
    /// Wrap from the last plan item back to the first
    All,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatMode::None => write!(f, "none"),
            RepeatMode::One => write!(f, "one"),
            RepeatMode::All => write!(f, "all"),
        }
    }
}

impl FromStr for RepeatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RepeatMode::None),
            "one" => Ok(RepeatMode::One),
            "all" => Ok(RepeatMode::All),
            other => Err(Error::validation("repeat", format!("'{}' is not one of none, one, all", other))),
        }
    }
}

/// Wire name of a command or broadcast
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Status,
    Play,
    Pause,
    Unpause,
    Stop,
    Seek,
    AutoAdvance,
    Repeat,
    PlayOnLoad,
    GetPlan,
    Load,
    Unload,
    Output,
    Add,
    Remove,
    Clear,
    SetMarker,
    ResetPlayed,
    Quit,
    /// Position-only tick (outbound only)
    Pos,
    /// Playback stopped at the end of the plan (outbound only)
    Stopped,
    /// Unrecognised command name, echoed back in the FAIL reply
    Unknown(String),
}

impl Topic {
    pub fn from_wire(name: &str) -> Topic {
        match name {
            "STATUS" => Topic::Status,
            "PLAY" => Topic::Play,
            "PAUSE" => Topic::Pause,
            "UNPAUSE" => Topic::Unpause,
            "STOP" => Topic::Stop,
            "SEEK" => Topic::Seek,
            "AUTOADVANCE" => Topic::AutoAdvance,
            "REPEAT" => Topic::Repeat,
            "PLAYONLOAD" => Topic::PlayOnLoad,
            "GET_PLAN" => Topic::GetPlan,
            "LOAD" => Topic::Load,
            "UNLOAD" => Topic::Unload,
            "OUTPUT" => Topic::Output,
            "ADD" => Topic::Add,
            "REMOVE" => Topic::Remove,
            "CLEAR" => Topic::Clear,
            "SETMARKER" => Topic::SetMarker,
            "RESETPLAYED" => Topic::ResetPlayed,
            "QUIT" => Topic::Quit,
            "POS" => Topic::Pos,
            "STOPPED" => Topic::Stopped,
            other => Topic::Unknown(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Topic::Status => "STATUS",
            Topic::Play => "PLAY",
            Topic::Pause => "PAUSE",
            Topic::Unpause => "UNPAUSE",
            Topic::Stop => "STOP",
            Topic::Seek => "SEEK",
            Topic::AutoAdvance => "AUTOADVANCE",
            Topic::Repeat => "REPEAT",
            Topic::PlayOnLoad => "PLAYONLOAD",
            Topic::GetPlan => "GET_PLAN",
            Topic::Load => "LOAD",
            Topic::Unload => "UNLOAD",
            Topic::Output => "OUTPUT",
            Topic::Add => "ADD",
            Topic::Remove => "REMOVE",
            Topic::Clear => "CLEAR",
            Topic::SetMarker => "SETMARKER",
            Topic::ResetPlayed => "RESETPLAYED",
            Topic::Quit => "QUIT",
            Topic::Pos => "POS",
            Topic::Stopped => "STOPPED",
            Topic::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A channel command with typed arguments
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Play,
    Pause,
    Unpause,
    Stop,
    Seek(f64),
    AutoAdvance(bool),
    Repeat(RepeatMode),
    PlayOnLoad(bool),
    GetPlan(String),
    Load(i64),
    Unload,
    /// Output device name; `None` selects the default device
    Output(Option<String>),
    Add(Box<PlanItem>),
    Remove(i64),
    Clear,
    /// Marker edit for every item with this id ("-1" is the loaded item)
    SetMarker { id: String, marker: Marker },
    /// Reset play counts for the item at a weight, or every item for -1
    ResetPlayed(i64),
    Quit,
}

impl Command {
    pub fn topic(&self) -> Topic {
        match self {
            Command::Status => Topic::Status,
            Command::Play => Topic::Play,
            Command::Pause => Topic::Pause,
            Command::Unpause => Topic::Unpause,
            Command::Stop => Topic::Stop,
            Command::Seek(_) => Topic::Seek,
            Command::AutoAdvance(_) => Topic::AutoAdvance,
            Command::Repeat(_) => Topic::Repeat,
            Command::PlayOnLoad(_) => Topic::PlayOnLoad,
            Command::GetPlan(_) => Topic::GetPlan,
            Command::Load(_) => Topic::Load,
            Command::Unload => Topic::Unload,
            Command::Output(_) => Topic::Output,
            Command::Add(_) => Topic::Add,
            Command::Remove(_) => Topic::Remove,
            Command::Clear => Topic::Clear,
            Command::SetMarker { .. } => Topic::SetMarker,
            Command::ResetPlayed(_) => Topic::ResetPlayed,
            Command::Quit => Topic::Quit,
        }
    }

    /// Decode `COMMAND[:ARGS]`
    ///
    /// On failure the topic is still returned so the caller can tag its
    /// FAIL reply.
    pub fn decode(text: &str) -> Result<Command, (Topic, Error)> {
        let (name, args) = match text.split_once(':') {
            Some((name, args)) => (name, Some(args)),
            None => (text, None),
        };
        let topic = Topic::from_wire(name);

        let command = match &topic {
            Topic::Status => Ok(Command::Status),
            Topic::Play => Ok(Command::Play),
            Topic::Pause => Ok(Command::Pause),
            Topic::Unpause => Ok(Command::Unpause),
            Topic::Stop => Ok(Command::Stop),
            Topic::Unload => Ok(Command::Unload),
            Topic::Clear => Ok(Command::Clear),
            Topic::Quit => Ok(Command::Quit),
            Topic::Seek => required(args, "position")
                .and_then(parse_seconds)
                .map(Command::Seek),
            Topic::AutoAdvance => required(args, "auto advance")
                .and_then(parse_bool)
                .map(Command::AutoAdvance),
            Topic::PlayOnLoad => required(args, "play on load")
                .and_then(parse_bool)
                .map(Command::PlayOnLoad),
            Topic::Repeat => required(args, "repeat")
                .and_then(|a| a.parse::<RepeatMode>())
                .map(Command::Repeat),
            Topic::GetPlan => required(args, "show plan id").map(|a| Command::GetPlan(a.to_string())),
            Topic::Load => required(args, "weight").and_then(parse_weight).map(Command::Load),
            Topic::Remove => required(args, "weight").and_then(parse_weight).map(Command::Remove),
            Topic::ResetPlayed => required(args, "weight")
                .and_then(parse_weight)
                .map(Command::ResetPlayed),
            Topic::Output => Ok(Command::Output(
                args.filter(|a| !a.is_empty() && *a != "None").map(str::to_string),
            )),
            Topic::Add => required(args, "item")
                .and_then(PlanItem::from_json)
                .map(|item| Command::Add(Box::new(item))),
            Topic::SetMarker => required(args, "marker").and_then(|a| {
                let (id, json) = a
                    .split_once(':')
                    .ok_or_else(|| Error::validation("marker", "expected <id>:<json-marker>"))?;
                Ok(Command::SetMarker {
                    id: id.to_string(),
                    marker: Marker::from_json(json)?,
                })
            }),
            Topic::Pos | Topic::Stopped | Topic::Unknown(_) => {
                Err(Error::UnknownCommand(name.to_string()))
            }
        };

        command.map_err(|e| (topic, e))
    }
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub source: Source,
    pub command: Command,
}

/// Why an inbound message could not be decoded
///
/// `source` is `None` when the source tag itself was unrecognised; such
/// messages are dropped without a reply.
#[derive(Debug)]
pub struct Rejected {
    pub source: Option<Source>,
    pub topic: Topic,
    pub error: Error,
}

impl Request {
    /// Decode `SOURCE:COMMAND[:ARG...]`
    pub fn decode(line: &str) -> Result<Request, Rejected> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (source_tag, rest) = line.split_once(':').unwrap_or((line, ""));

        let source = source_tag.parse::<Source>().map_err(|error| Rejected {
            source: None,
            topic: Topic::Unknown(String::new()),
            error,
        })?;

        Command::decode(rest)
            .map(|command| Request { source, command })
            .map_err(|(topic, error)| Rejected {
                source: Some(source),
                topic,
                error,
            })
    }
}

fn required<'a>(args: Option<&'a str>, what: &str) -> Result<&'a str, Error> {
    args.filter(|a| !a.is_empty())
        .ok_or_else(|| Error::validation(what, "argument missing"))
}

fn parse_bool(arg: &str) -> Result<bool, Error> {
    match arg.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::validation("flag", format!("'{}' is not a boolean", other))),
    }
}

fn parse_weight(arg: &str) -> Result<i64, Error> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| Error::validation("weight", format!("'{}' is not an integer", arg)))
}

fn parse_seconds(arg: &str) -> Result<f64, Error> {
    match arg.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(Error::validation("position", format!("'{}' is not a position in seconds", arg))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MarkerPosition;

    #[test]
    fn test_decode_simple_commands() {
        let req = Request::decode("UI:PLAY").unwrap();
        assert_eq!(req.source, Source::Ui);
        assert_eq!(req.command, Command::Play);

        let req = Request::decode("WEBSOCKET:SEEK:12.5\n").unwrap();
        assert_eq!(req.command, Command::Seek(12.5));

        let req = Request::decode("TEST:REPEAT:all").unwrap();
        assert_eq!(req.command, Command::Repeat(RepeatMode::All));

        let req = Request::decode("CONTROLLER:AUTOADVANCE:True").unwrap();
        assert_eq!(req.command, Command::AutoAdvance(true));

        let req = Request::decode("TEST:OUTPUT:None").unwrap();
        assert_eq!(req.command, Command::Output(None));
    }

    #[test]
    fn test_decode_setmarker_keeps_colons_in_json() {
        let req = Request::decode(
            r#"WEBSOCKET:SETMARKER:-1:{"name":"cue","time":4,"position":"mid","section":null}"#,
        )
        .unwrap();

        match req.command {
            Command::SetMarker { id, marker } => {
                assert_eq!(id, "-1");
                assert_eq!(marker.position, MarkerPosition::Mid);
                assert_eq!(marker.time, 4.0);
            }
            other => panic!("expected SetMarker, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_add_item() {
        let req = Request::decode(r#"UI:ADD:{"title":"News","managedid":3,"weight":2}"#).unwrap();
        match req.command {
            Command::Add(item) => {
                assert_eq!(item.weight, 2);
                assert!(item.needs_id());
            }
            other => panic!("expected Add, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_source_has_no_reply_target() {
        let rejected = Request::decode("RADIO:PLAY").unwrap_err();
        assert!(rejected.source.is_none());
        assert!(matches!(rejected.error, Error::UnknownSource(_)));
    }

    #[test]
    fn test_bad_arguments_keep_topic() {
        let rejected = Request::decode("UI:LOAD:two").unwrap_err();
        assert_eq!(rejected.source, Some(Source::Ui));
        assert_eq!(rejected.topic, Topic::Load);

        let rejected = Request::decode("UI:SEEK").unwrap_err();
        assert_eq!(rejected.topic, Topic::Seek);

        let rejected = Request::decode("UI:DANCE").unwrap_err();
        assert_eq!(rejected.topic, Topic::Unknown("DANCE".into()));
        assert!(matches!(rejected.error, Error::UnknownCommand(_)));
    }

    #[test]
    fn test_outbound_only_topics_are_not_commands() {
        assert!(Request::decode("ALL:STOPPED").is_err());
        assert!(Request::decode("ALL:POS:1.0").is_err());
    }
}
