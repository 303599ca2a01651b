//! Inbound and outbound message types for the gateway wire protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message delivered over the gateway stream. Unknown wire fields are
/// ignored; missing fields decode to empty strings. `timestamp` is whatever
/// the gateway sent (string or number) and is not reinterpreted;
/// `received_at` is stamped locally at decode time.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub sender: String,
    pub sender_name: String,
    pub room_id: String,
    pub room_name: String,
    pub content: String,
    pub timestamp: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    room_name: String,
    #[serde(default)]
    timestamp: serde_json::Value,
}

impl InboundEvent {
    /// Decode a text frame into an event, stamping the local receipt time.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let wire: WireEvent = serde_json::from_str(text)?;
        Ok(Self {
            sender: wire.sender,
            sender_name: wire.sender_name,
            room_id: wire.room_id,
            room_name: wire.room_name,
            content: wire.content,
            timestamp: wire.timestamp,
            received_at: Utc::now(),
        })
    }
}

/// Body of a send_message request: target room or user, text content, and an
/// optional list of user ids to mention. Built by the caller, serialized as-is.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub target: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_list: Option<Vec<String>>,
}
