//! Replies and broadcasts leaving a channel

use super::command::Topic;
use super::source::Source;
use std::fmt;

/// Result of a handled command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Okay,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Okay => write!(f, "OKAY"),
            Outcome::Fail => write!(f, "FAIL"),
        }
    }
}

/// A message emitted by a channel
///
/// Replies carry an outcome; broadcasts (`ALL:STATUS:<json>`, `ALL:POS:<secs>`,
/// `ALL:STOPPED`) do not.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub source: Source,
    pub topic: Topic,
    pub outcome: Option<Outcome>,
    pub payload: Option<String>,
}

impl Outbound {
    pub fn okay(source: Source, topic: Topic) -> Self {
        Self {
            source,
            topic,
            outcome: Some(Outcome::Okay),
            payload: None,
        }
    }

    pub fn okay_with(source: Source, topic: Topic, payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::okay(source, topic)
        }
    }

    pub fn fail(source: Source, topic: Topic, reason: impl fmt::Display) -> Self {
        Self {
            source,
            topic,
            outcome: Some(Outcome::Fail),
            payload: Some(reason.to_string()),
        }
    }

    pub fn broadcast(topic: Topic, payload: Option<String>) -> Self {
        Self {
            source: Source::All,
            topic,
            outcome: None,
            payload,
        }
    }

    pub fn is_position_tick(&self) -> bool {
        self.topic == Topic::Pos
    }

    pub fn is_reply(&self) -> bool {
        self.outcome.is_some()
    }

    /// `SOURCE:COMMAND[:STATUS][:PAYLOAD]`
    pub fn to_wire(&self) -> String {
        let mut wire = format!("{}:{}", self.source, self.topic);
        if let Some(outcome) = self.outcome {
            wire.push(':');
            wire.push_str(&outcome.to_string());
        }
        if let Some(payload) = &self.payload {
            wire.push(':');
            wire.push_str(payload);
        }
        wire
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(Outbound::okay(Source::Ui, Topic::Play).to_wire(), "UI:PLAY:OKAY");
        assert_eq!(
            Outbound::fail(Source::WebSocket, Topic::Load, "no item at weight 4").to_wire(),
            "WEBSOCKET:LOAD:FAIL:no item at weight 4"
        );
        assert_eq!(
            Outbound::fail(Source::Test, Topic::Unknown("DANCE".into()), "x").to_wire(),
            "TEST:DANCE:FAIL:x"
        );
    }

    #[test]
    fn test_broadcast_wire_format() {
        let status = Outbound::broadcast(Topic::Status, Some("{}".into()));
        assert_eq!(status.to_wire(), "ALL:STATUS:{}");
        assert!(!status.is_reply());

        assert_eq!(Outbound::broadcast(Topic::Stopped, None).to_wire(), "ALL:STOPPED");
        assert!(Outbound::broadcast(Topic::Pos, Some("1.5".into())).is_position_tick());
    }
}
