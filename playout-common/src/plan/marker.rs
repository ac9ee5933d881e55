//! Cue markers attached to plan items

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Where a marker sits within an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPosition {
    Start,
    Mid,
    End,
}

impl fmt::Display for MarkerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerPosition::Start => write!(f, "start"),
            MarkerPosition::Mid => write!(f, "mid"),
            MarkerPosition::End => write!(f, "end"),
        }
    }
}

impl FromStr for MarkerPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(MarkerPosition::Start),
            "mid" => Ok(MarkerPosition::Mid),
            "end" => Ok(MarkerPosition::End),
            other => Err(Error::validation(
                "position",
                format!("'{}' is not one of start, mid, end", other),
            )),
        }
    }
}

/// A named cue point at a time offset
///
/// Markers sharing a `section` label form a loop region. Markers with no
/// section carry the item's intro (start), cue (mid) and outro (end) points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub name: String,
    /// Offset in seconds from the start of the item
    pub time: f64,
    pub position: MarkerPosition,
    pub section: Option<String>,
}

impl Marker {
    /// Build a marker, rejecting negative or non-finite times
    pub fn new(
        name: impl Into<String>,
        time: f64,
        position: MarkerPosition,
        section: Option<String>,
    ) -> Result<Self> {
        if !time.is_finite() || time < 0.0 {
            return Err(Error::validation(
                "time",
                format!("{} must be a finite number of seconds >= 0", time),
            ));
        }
        Ok(Self {
            name: name.into(),
            time,
            position,
            section,
        })
    }

    /// Validate an untyped JSON marker
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("marker", "expected a JSON object"))?;

        let name = match obj.get("name") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(Error::validation("name", format!("must be text, got {}", other)))
            }
            None => return Err(Error::validation("name", "is required")),
        };

        // Integers are accepted and coerced to seconds as f64
        let time = match obj.get("time") {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| Error::validation("time", "is not representable as a float"))?,
            Some(other) => {
                return Err(Error::validation("time", format!("must be numeric, got {}", other)))
            }
            None => return Err(Error::validation("time", "is required")),
        };

        let position = match obj.get("position") {
            Some(Value::String(s)) => s.parse::<MarkerPosition>()?,
            Some(other) => {
                return Err(Error::validation(
                    "position",
                    format!("must be one of start, mid, end, got {}", other),
                ))
            }
            None => return Err(Error::validation("position", "is required")),
        };

        let section = match obj.get("section") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(Error::validation(
                    "section",
                    format!("must be text or null, got {}", other),
                ))
            }
        };

        Self::new(name, time, position, section)
    }

    /// Parse and validate a marker from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::validation("marker", format!("not valid JSON: {}", e)))?;
        Self::from_value(&value)
    }

    /// True when both markers occupy the same (position, section) slot
    pub fn same_slot(&self, other: &Marker) -> bool {
        self.position == other.position && self.section == other.section
    }
}

impl<'de> Deserialize<'de> for Marker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Marker::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_coerces_integer_time() {
        let marker = Marker::from_value(&json!({
            "name": "intro", "time": 3, "position": "start", "section": null
        }))
        .unwrap();

        assert_eq!(marker.time, 3.0);
        assert_eq!(marker.position, MarkerPosition::Start);
        assert!(marker.section.is_none());
    }

    #[test]
    fn test_from_value_missing_section_is_none() {
        let marker =
            Marker::from_value(&json!({"name": "cue", "time": 1.5, "position": "mid"})).unwrap();
        assert!(marker.section.is_none());
    }

    #[test]
    fn test_from_value_names_offending_field() {
        let cases = [
            (json!({"name": 4, "time": 1.0, "position": "mid"}), "name"),
            (json!({"name": "a", "time": "1.0", "position": "mid"}), "time"),
            (json!({"name": "a", "time": 1.0, "position": "middle"}), "position"),
            (json!({"name": "a", "time": 1.0, "position": "mid", "section": 7}), "section"),
            (json!({"name": "a", "time": -1.0, "position": "mid"}), "time"),
            (json!(["not", "an", "object"]), "marker"),
        ];

        for (value, expected_field) in cases {
            match Marker::from_value(&value) {
                Err(Error::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected validation error on {}, got {:?}", expected_field, other),
            }
        }
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            Marker::from_json("{not json"),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_round_trip_through_serde() {
        let marker = Marker::new("loop", 12.25, MarkerPosition::End, Some("chorus".into())).unwrap();
        let text = serde_json::to_string(&marker).unwrap();
        let back: Marker = serde_json::from_str(&text).unwrap();
        assert_eq!(back, marker);
    }

    #[test]
    fn test_same_slot() {
        let a = Marker::new("a", 1.0, MarkerPosition::Mid, None).unwrap();
        let b = Marker::new("b", 2.0, MarkerPosition::Mid, None).unwrap();
        let c = Marker::new("c", 2.0, MarkerPosition::Mid, Some("x".into())).unwrap();
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
    }
}
