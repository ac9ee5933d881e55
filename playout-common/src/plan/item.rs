//! Show-plan items

use super::marker::{Marker, MarkerPosition};
use crate::time::monotonic_nanos;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Weight given to a loaded item after it has been removed from its plan
pub const DETACHED_WEIGHT: i64 = -1;

/// Where the audio for an item comes from
///
/// Exactly one reference is carried per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    /// Upstream music library track
    Track(i64),
    /// Upstream managed (jingle/advert) item
    Managed(i64),
    /// Local file, relative to the root folder or absolute
    File(String),
}

/// One playable entry in a show plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    /// Upstream id, or a synthesized ghost id
    pub id: String,
    pub weight: i64,
    pub title: String,
    pub artist: Option<String>,
    pub content: ContentRef,
    /// Length in seconds (0 when unknown)
    pub length: f64,
    markers: Vec<Marker>,
    pub play_count: u32,
    pub clean: bool,
}

/// Synthesize an id for an item the upstream content system has not assigned one
pub fn ghost_id(channel: u8) -> String {
    format!("I{}-{}", channel, monotonic_nanos())
}

impl PlanItem {
    pub fn new(id: impl Into<String>, weight: i64, title: impl Into<String>, content: ContentRef) -> Self {
        Self {
            id: id.into(),
            weight,
            title: title.into(),
            artist: None,
            content,
            length: 0.0,
            markers: Vec::new(),
            play_count: 0,
            clean: true,
        }
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// True when the item has not been given an upstream id yet
    pub fn needs_id(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_detached(&self) -> bool {
        self.weight < 0
    }

    /// Apply a marker edit
    ///
    /// An existing marker in the same (position, section) slot is removed
    /// when `marker.time` is zero and replaced in place otherwise. Unmatched
    /// markers are appended.
    pub fn set_marker(&mut self, marker: Marker) -> &mut Self {
        match self.markers.iter().position(|m| m.same_slot(&marker)) {
            Some(index) if marker.time == 0.0 => {
                self.markers.remove(index);
            }
            Some(index) => self.markers[index] = marker,
            None => self.markers.push(marker),
        }
        self
    }

    fn unsectioned_time(&self, position: MarkerPosition) -> f64 {
        self.markers
            .iter()
            .find(|m| m.position == position && m.section.is_none())
            .map(|m| m.time)
            .unwrap_or(0.0)
    }

    pub fn intro(&self) -> f64 {
        self.unsectioned_time(MarkerPosition::Start)
    }

    pub fn cue(&self) -> f64 {
        self.unsectioned_time(MarkerPosition::Mid)
    }

    pub fn outro(&self) -> f64 {
        self.unsectioned_time(MarkerPosition::End)
    }

    /// Plain record form used for snapshots and broadcasts
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self.record()).unwrap_or(Value::Null)
    }

    fn record(&self) -> PlanItemRecord<'_> {
        let (trackid, managedid, filename) = match &self.content {
            ContentRef::Track(id) => (Some(*id), None, None),
            ContentRef::Managed(id) => (None, Some(*id), None),
            ContentRef::File(name) => (None, None, Some(name.as_str())),
        };
        PlanItemRecord {
            id: &self.id,
            weight: self.weight,
            title: &self.title,
            artist: self.artist.as_deref(),
            trackid,
            managedid,
            filename,
            length: self.length,
            intro: self.intro(),
            cue: self.cue(),
            outro: self.outro(),
            markers: &self.markers,
            play_count: self.play_count,
            clean: self.clean,
        }
    }

    /// Validate an untyped JSON item
    ///
    /// A missing id is left empty for the caller to fill with [`ghost_id`].
    /// A missing weight means "append". Legacy `intro`/`cue`/`outro` numbers
    /// become unsectioned markers when no marker already fills that slot.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::validation("item", "expected a JSON object"))?;

        let id = match obj.get("id") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(Error::validation("id", format!("must be text, got {}", other))),
        };

        let weight = match obj.get("weight") {
            None | Some(Value::Null) => DETACHED_WEIGHT,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| Error::validation("weight", format!("must be an integer, got {}", v)))?,
        };

        let title = match obj.get("title") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => return Err(Error::validation("title", format!("must be text, got {}", other))),
            None => return Err(Error::validation("title", "is required")),
        };

        let artist = optional_text(obj, "artist")?;
        let content = content_ref(obj)?;
        let length = match obj.get("length") {
            None | Some(Value::Null) => 0.0,
            Some(v) => parse_length(v)?,
        };

        let play_count = match obj.get("play_count") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| Error::validation("play_count", format!("must be a count, got {}", v)))?,
        };

        let clean = match obj.get("clean") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(Error::validation("clean", format!("must be a boolean, got {}", other))),
        };

        let mut item = PlanItem {
            id,
            weight,
            title,
            artist,
            content,
            length,
            markers: Vec::new(),
            play_count,
            clean,
        };

        match obj.get("markers") {
            None | Some(Value::Null) => {}
            Some(Value::Array(list)) => {
                for raw in list {
                    item.set_marker(Marker::from_value(raw)?);
                }
            }
            Some(other) => {
                return Err(Error::validation("markers", format!("must be a list, got {}", other)))
            }
        }

        for (key, position) in [
            ("intro", MarkerPosition::Start),
            ("cue", MarkerPosition::Mid),
            ("outro", MarkerPosition::End),
        ] {
            let Some(v) = obj.get(key).filter(|v| !v.is_null()) else {
                continue;
            };
            let time = v
                .as_f64()
                .ok_or_else(|| Error::validation(key, format!("must be numeric, got {}", v)))?;
            let occupied = item
                .markers
                .iter()
                .any(|m| m.position == position && m.section.is_none());
            if time > 0.0 && !occupied {
                item.set_marker(Marker::new(key, time, position, None)?);
            }
        }

        Ok(item)
    }

    /// Parse and validate an item from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::validation("item", format!("not valid JSON: {}", e)))?;
        Self::from_value(&value)
    }
}

#[derive(Serialize)]
struct PlanItemRecord<'a> {
    id: &'a str,
    weight: i64,
    title: &'a str,
    artist: Option<&'a str>,
    trackid: Option<i64>,
    managedid: Option<i64>,
    filename: Option<&'a str>,
    length: f64,
    intro: f64,
    cue: f64,
    outro: f64,
    markers: &'a [Marker],
    play_count: u32,
    clean: bool,
}

impl Serialize for PlanItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PlanItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        PlanItem::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn optional_text(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::validation(key, format!("must be text, got {}", other))),
    }
}

fn content_ref(obj: &Map<String, Value>) -> Result<ContentRef> {
    let id_field = |key: &str| -> Result<Option<i64>> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| Error::validation(key, format!("must be an integer id, got {}", v))),
        }
    };

    let track = id_field("trackid")?;
    let managed = id_field("managedid")?;
    let file = optional_text(obj, "filename")?.filter(|s| !s.is_empty());

    match (track, managed, file) {
        (Some(id), None, None) => Ok(ContentRef::Track(id)),
        (None, Some(id), None) => Ok(ContentRef::Managed(id)),
        (None, None, Some(name)) => Ok(ContentRef::File(name)),
        (None, None, None) => Err(Error::validation(
            "content",
            "one of trackid, managedid or filename is required",
        )),
        _ => Err(Error::validation(
            "content",
            "only one of trackid, managedid or filename may be set",
        )),
    }
}

/// Seconds as a number, or "HH:MM:SS" / "MM:SS" text
fn parse_length(value: &Value) -> Result<f64> {
    let seconds = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split(':').try_fold(0.0_f64, |acc, part| {
            part.trim().parse::<f64>().ok().map(|p| acc * 60.0 + p)
        }),
        _ => None,
    };
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => Ok(s),
        _ => Err(Error::validation(
            "length",
            format!("must be seconds or HH:MM:SS, got {}", value),
        )),
    }
}
