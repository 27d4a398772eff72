//! Envelope - the wire format wrapper for all bus messages.
//!
//! On the wire every envelope is one WebSocket text frame holding a JSON
//! object:
//!
//! ```text
//! { "type": "file_open", "source": "agent", "payload": { ... },
//!   "timestamp": 1705000000000, "messageId": "6f1c..." }
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{BusError, ClientId, Message, MessageId, MessageType};

/// Current wall-clock time in epoch milliseconds.
///
/// Informational only; nothing on the bus orders or times out by it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// The untyped wire shape of an envelope.
///
/// This is what the broker sees: it validates the outer shape only and
/// relays the payload without interpreting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEnvelope {
    /// Message type name
    #[serde(rename = "type")]
    pub kind: String,
    /// Sending client (absent on broker-originated envelopes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ClientId>,
    /// Type-specific payload
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    /// Epoch milliseconds at creation
    pub timestamp: u64,
    /// Unique per sending process
    pub message_id: String,
}

impl RawEnvelope {
    /// Parse and validate a text frame.
    pub fn from_json(text: &str) -> Result<Self, BusError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(BusError::Deserialization)?;
        if raw.kind.is_empty() {
            return Err(BusError::MissingField("type"));
        }
        if raw.message_id.is_empty() {
            return Err(BusError::MissingField("messageId"));
        }
        Ok(raw)
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(BusError::Serialization)
    }

    /// The message type named by this envelope.
    pub fn message_type(&self) -> MessageType {
        MessageType::parse(&self.kind)
    }
}

/// The envelope wraps every bus message with routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Message type and typed payload
    pub message: Message,
    /// Sending client; `None` for broker diagnostics
    pub source: Option<ClientId>,
    /// Epoch milliseconds at creation - informational only
    pub timestamp: u64,
    /// Unique per sending process lifetime
    pub message_id: MessageId,
}

impl Envelope {
    /// Create a new envelope for sending.
    pub fn new(source: ClientId, message: Message) -> Self {
        Self {
            message,
            source: Some(source),
            timestamp: now_millis(),
            message_id: MessageId::new(),
        }
    }

    /// Create an envelope originated by the broker (no source).
    pub fn from_broker(message: Message) -> Self {
        Self {
            message,
            source: None,
            timestamp: now_millis(),
            message_id: MessageId::new(),
        }
    }

    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// Convert to the untyped wire shape.
    pub fn to_raw(&self) -> Result<RawEnvelope, BusError> {
        Ok(RawEnvelope {
            kind: self.message_type().as_str().to_string(),
            source: self.source,
            payload: self.message.payload_value()?,
            timestamp: self.timestamp,
            message_id: self.message_id.as_str().to_string(),
        })
    }

    /// Decode the typed payload of a raw envelope.
    pub fn from_raw(raw: RawEnvelope) -> Result<Self, BusError> {
        let message = Message::from_parts(&raw.kind, raw.payload)?;
        Ok(Self {
            message,
            source: raw.source,
            timestamp: raw.timestamp,
            message_id: MessageId::from_wire(raw.message_id)?,
        })
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, BusError> {
        self.to_raw()?.to_json()
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, BusError> {
        Self::from_raw(RawEnvelope::from_json(text)?)
    }
}
