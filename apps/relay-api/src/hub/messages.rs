//! Wire-format messages for the WebSocket (push) transport.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::event::{EventRecord, NewEvent};

// ---------------------------------------------------------------------------
// Message type tags
// ---------------------------------------------------------------------------

pub const TYPE_LOG: &str = "log";
pub const TYPE_INIT: &str = "init";
pub const TYPE_NEW_LOG: &str = "newLog";
pub const TYPE_CLIENT_COUNT: &str = "clientCount";

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message pushed from the hub to a subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Sent once, first, to every new subscriber.
    #[serde(rename_all = "camelCase")]
    Init {
        logs: Vec<Arc<EventRecord>>,
        total_clients: usize,
    },
    NewLog { log: Arc<EventRecord> },
    ClientCount { count: usize },
}

impl ServerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Init { .. } => TYPE_INIT,
            ServerMessage::NewLog { .. } => TYPE_NEW_LOG,
            ServerMessage::ClientCount { .. } => TYPE_CLIENT_COUNT,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from a client. The payload is decoded per type.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub log: Value,
}

/// A decoded client message the adapter knows how to act on.
#[derive(Debug)]
pub enum ClientCommand {
    Submit(NewEvent),
    /// Well-formed JSON with a type tag this server does not handle.
    Unsupported(String),
}

/// Decode a raw text frame.
pub fn parse_client_message(text: &str) -> Result<ClientCommand, serde_json::Error> {
    let msg: ClientMessage = serde_json::from_str(text)?;
    if msg.kind == TYPE_LOG {
        let event: NewEvent = serde_json::from_value(msg.log)?;
        Ok(ClientCommand::Submit(event))
    } else {
        Ok(ClientCommand::Unsupported(msg.kind))
    }
}
