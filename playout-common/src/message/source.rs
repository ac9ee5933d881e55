//! Message source tags

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who a message came from, and therefore where its replies are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    WebSocket,
    Ui,
    Controller,
    Test,
    All,
}

impl Source {
    pub const ALL_SOURCES: [Source; 5] = [
        Source::WebSocket,
        Source::Ui,
        Source::Controller,
        Source::Test,
        Source::All,
    ];

    pub fn as_wire(&self) -> &'static str {
        match self {
            Source::WebSocket => "WEBSOCKET",
            Source::Ui => "UI",
            Source::Controller => "CONTROLLER",
            Source::Test => "TEST",
            Source::All => "ALL",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL_SOURCES
            .into_iter()
            .find(|src| src.as_wire() == s)
            .ok_or_else(|| Error::UnknownSource(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for source in Source::ALL_SOURCES {
            assert_eq!(source.to_string().parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn test_unknown_and_lowercase_rejected() {
        assert!(matches!("SERIAL".parse::<Source>(), Err(Error::UnknownSource(_))));
        assert!(matches!("ui".parse::<Source>(), Err(Error::UnknownSource(_))));
    }
}
