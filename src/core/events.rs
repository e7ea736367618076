//! Progress protocol emitted by the download engine.
//!
//! Every notification is an [`Event`] envelope plus a freeform [`Payload`]
//! whose keys depend on the event type. Field names follow the wire shape
//! (`Type`, `Name`, `ShowName`, `ID`) so the pair can be serialized as-is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const KEY_TOTAL: &str = "Total";
pub const KEY_DOWNLOADED: &str = "Downloaded";
pub const KEY_URL: &str = "URL";
pub const KEY_INDEX: &str = "Index";
pub const KEY_TEXT: &str = "Text";
pub const KEY_ERROR: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    StartOne,
    Update,
    End,
    EndOne,
    Message,
    Error,
}

impl EventKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StartOne => "startOne",
            Self::Update => "update",
            Self::End => "end",
            Self::EndOne => "endOne",
            Self::Message => "msg",
            Self::Error => "err",
        }
    }

    /// Unknown tags map to `None`; consumers skip them.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "startOne" => Some(Self::StartOne),
            "update" => Some(Self::Update),
            "end" => Some(Self::End),
            "endOne" => Some(Self::EndOne),
            "msg" => Some(Self::Message),
            "err" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "Type")]
    pub event_type: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "ShowName", default)]
    pub show_name: String,
    #[serde(rename = "ID", default)]
    pub id: String,
}

impl Event {
    pub fn new(kind: EventKind, name: &str, show_name: &str, id: &str) -> Self {
        Self {
            event_type: kind.as_wire().to_string(),
            name: name.to_string(),
            show_name: show_name.to_string(),
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_wire(&self.event_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for PayloadValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for PayloadValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for PayloadValue {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<f64> for PayloadValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for PayloadValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for PayloadValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, PayloadValue>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<PayloadValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.0.get(key)
    }

    /// Integer view of a numeric key. Floats are truncated, text is `None`.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            PayloadValue::Int(v) => Some(*v),
            PayloadValue::Float(v) if v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            PayloadValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn progress(total: u64, downloaded: u64) -> Self {
        Self::new().with(KEY_TOTAL, total).with(KEY_DOWNLOADED, downloaded)
    }

    pub fn file(url: &str, index: usize, total: usize) -> Self {
        Self::new()
            .with(KEY_URL, url)
            .with(KEY_INDEX, index)
            .with(KEY_TOTAL, total)
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::new().with(KEY_TEXT, text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new().with(KEY_ERROR, text.into())
    }
}

/// One notification as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct EventMsg {
    pub event: Event,
    pub payload: Payload,
}
