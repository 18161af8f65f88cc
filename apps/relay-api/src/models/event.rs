//! Interaction events: the inbound shape clients submit and the immutable
//! record the hub stores and broadcasts.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Placeholder used when the transport cannot observe the peer address.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Placeholder for client environment fields that were not sent.
const UNKNOWN_ENV: &str = "Unknown";

/// The interaction type tag. Unrecognized tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Visit,
    Click,
    Scroll,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Visit => "visit",
            EventKind::Click => "click",
            EventKind::Scroll => "scroll",
            EventKind::Other(tag) => tag,
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "visit" => EventKind::Visit,
            "click" => EventKind::Click,
            "scroll" => EventKind::Scroll,
            _ => EventKind::Other(tag),
        }
    }
}

impl From<&str> for EventKind {
    fn from(tag: &str) -> Self {
        EventKind::from(tag.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value in an event's `details` map: a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetailValue {
    Number(serde_json::Number),
    Text(String),
}

impl From<&str> for DetailValue {
    fn from(value: &str) -> Self {
        DetailValue::Text(value.to_string())
    }
}

impl From<String> for DetailValue {
    fn from(value: String) -> Self {
        DetailValue::Text(value)
    }
}

impl From<i64> for DetailValue {
    fn from(value: i64) -> Self {
        DetailValue::Number(value.into())
    }
}

pub type Details = BTreeMap<String, DetailValue>;

fn unknown_env() -> String {
    UNKNOWN_ENV.to_string()
}

/// An event as submitted by a client.
///
/// Server-owned fields (`seq`, `serverTimestamp`, `clientIp`) are not part of
/// this shape; if a client sends them they are silently dropped.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    #[serde(rename = "type", alias = "kind")]
    #[schema(value_type = String, example = "click")]
    pub kind: EventKind,
    #[serde(rename = "timestamp", alias = "clientTimestamp")]
    pub client_timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default = "unknown_env")]
    pub browser: String,
    #[serde(default = "unknown_env")]
    pub os: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub details: Details,
}

impl NewEvent {
    pub fn new(kind: impl Into<EventKind>, session_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            client_timestamp: Utc::now(),
            session_id: session_id.into(),
            browser: unknown_env(),
            os: unknown_env(),
            details: Details::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<DetailValue>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Seal the event with the fields only the hub may set.
    pub(crate) fn into_record(
        self,
        seq: u64,
        server_timestamp: DateTime<Utc>,
        source_address: Option<String>,
    ) -> EventRecord {
        EventRecord {
            seq,
            kind: self.kind,
            client_timestamp: self.client_timestamp,
            server_timestamp,
            session_id: self.session_id,
            browser: self.browser,
            os: self.os,
            source_address: source_address
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            details: self.details,
        }
    }
}

/// A logged interaction. Never mutated after the hub creates it; shared as
/// `Arc<EventRecord>` between the log and in-flight broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Position in the hub's append order, starting at 1.
    pub seq: u64,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "visit")]
    pub kind: EventKind,
    #[serde(rename = "timestamp")]
    pub client_timestamp: DateTime<Utc>,
    pub server_timestamp: DateTime<Utc>,
    pub session_id: String,
    pub browser: String,
    pub os: String,
    #[serde(rename = "clientIp")]
    pub source_address: String,
    #[schema(value_type = Object)]
    pub details: Details,
}
