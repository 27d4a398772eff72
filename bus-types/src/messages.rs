//! Typed message payloads for the bus.
//!
//! Each known message type has its own payload struct. Types this build does
//! not know about are preserved as [`Message::Unknown`] so they can be relayed
//! and handled by newer peers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{BusError, ClientId, LearningRecord};

/// Message type discriminator (the envelope's `type` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageType {
    /// First message on a connection, names the sending client
    Identify,
    /// Health check request
    Ping,
    /// Health check response
    Pong,
    /// Ask the peer to open a file
    FileOpen,
    /// Result of a file open request
    FileOpened,
    /// Batch of learning records
    LearningUpdate,
    /// Editor/agent context changed
    ContextUpdate,
    /// User activity event
    ActivitySync,
    /// A task began
    TaskStarted,
    /// A task ended
    TaskStopped,
    /// Progress within a running task
    TaskActivity,
    /// Broker diagnostics broadcast
    Stats,
    /// A type this build does not know
    Unknown(String),
}

impl MessageType {
    /// All known message types.
    pub const KNOWN: [MessageType; 12] = [
        MessageType::Identify,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::FileOpen,
        MessageType::FileOpened,
        MessageType::LearningUpdate,
        MessageType::ContextUpdate,
        MessageType::ActivitySync,
        MessageType::TaskStarted,
        MessageType::TaskStopped,
        MessageType::TaskActivity,
        MessageType::Stats,
    ];

    /// Parse a wire type name. Never fails: unrecognised names become
    /// [`MessageType::Unknown`].
    pub fn parse(name: &str) -> Self {
        match name {
            "identify" => MessageType::Identify,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "file_open" => MessageType::FileOpen,
            "file_opened" => MessageType::FileOpened,
            "learning_update" => MessageType::LearningUpdate,
            "context_update" => MessageType::ContextUpdate,
            "activity_sync" => MessageType::ActivitySync,
            "task_started" => MessageType::TaskStarted,
            "task_stopped" => MessageType::TaskStopped,
            "task_activity" => MessageType::TaskActivity,
            "stats" => MessageType::Stats,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Identify => "identify",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::FileOpen => "file_open",
            MessageType::FileOpened => "file_opened",
            MessageType::LearningUpdate => "learning_update",
            MessageType::ContextUpdate => "context_update",
            MessageType::ActivitySync => "activity_sync",
            MessageType::TaskStarted => "task_started",
            MessageType::TaskStopped => "task_stopped",
            MessageType::TaskActivity => "task_activity",
            MessageType::Stats => "stats",
            MessageType::Unknown(name) => name,
        }
    }

    /// Whether this is one of the known types.
    pub fn is_known(&self) -> bool {
        !matches!(self, MessageType::Unknown(_))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All bus messages: the envelope's `type` plus its typed `payload`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Connection identification
    Identify(Identify),
    /// Health check request
    Ping(Heartbeat),
    /// Health check response
    Pong(Heartbeat),
    /// Open a file in the peer
    FileOpen(FileOpen),
    /// Peer's answer to a file open request
    FileOpened(FileOpened),
    /// Learning record batch
    LearningUpdate(LearningUpdate),
    /// Context change
    ContextUpdate(ContextUpdate),
    /// Activity event
    ActivitySync(ActivitySync),
    /// Task start
    TaskStarted(TaskStarted),
    /// Task stop
    TaskStopped(TaskStopped),
    /// Task progress
    TaskActivity(TaskActivity),
    /// Broker diagnostics
    Stats(BrokerStats),
    /// Unrecognised type, payload kept verbatim
    Unknown {
        /// Wire type name.
        kind: String,
        /// Raw payload.
        payload: serde_json::Value,
    },
}

impl Message {
    /// The message type discriminator.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Identify(_) => MessageType::Identify,
            Message::Ping(_) => MessageType::Ping,
            Message::Pong(_) => MessageType::Pong,
            Message::FileOpen(_) => MessageType::FileOpen,
            Message::FileOpened(_) => MessageType::FileOpened,
            Message::LearningUpdate(_) => MessageType::LearningUpdate,
            Message::ContextUpdate(_) => MessageType::ContextUpdate,
            Message::ActivitySync(_) => MessageType::ActivitySync,
            Message::TaskStarted(_) => MessageType::TaskStarted,
            Message::TaskStopped(_) => MessageType::TaskStopped,
            Message::TaskActivity(_) => MessageType::TaskActivity,
            Message::Stats(_) => MessageType::Stats,
            Message::Unknown { kind, .. } => MessageType::Unknown(kind.clone()),
        }
    }

    /// Decode a typed message from its wire type name and raw payload.
    pub fn from_parts(kind: &str, payload: serde_json::Value) -> Result<Self, BusError> {
        let message_type = MessageType::parse(kind);
        let message = match message_type {
            MessageType::Identify => Message::Identify(decode(kind, payload)?),
            MessageType::Ping => Message::Ping(decode(kind, payload)?),
            MessageType::Pong => Message::Pong(decode(kind, payload)?),
            MessageType::FileOpen => Message::FileOpen(decode(kind, payload)?),
            MessageType::FileOpened => Message::FileOpened(decode(kind, payload)?),
            MessageType::LearningUpdate => Message::LearningUpdate(decode(kind, payload)?),
            MessageType::ContextUpdate => Message::ContextUpdate(decode(kind, payload)?),
            MessageType::ActivitySync => Message::ActivitySync(decode(kind, payload)?),
            MessageType::TaskStarted => Message::TaskStarted(decode(kind, payload)?),
            MessageType::TaskStopped => Message::TaskStopped(decode(kind, payload)?),
            MessageType::TaskActivity => Message::TaskActivity(decode(kind, payload)?),
            MessageType::Stats => Message::Stats(decode(kind, payload)?),
            MessageType::Unknown(kind) => Message::Unknown { kind, payload },
        };
        Ok(message)
    }

    /// Encode the payload as a JSON value.
    pub fn payload_value(&self) -> Result<serde_json::Value, BusError> {
        let value = match self {
            Message::Identify(p) => serde_json::to_value(p),
            Message::Ping(p) | Message::Pong(p) => serde_json::to_value(p),
            Message::FileOpen(p) => serde_json::to_value(p),
            Message::FileOpened(p) => serde_json::to_value(p),
            Message::LearningUpdate(p) => serde_json::to_value(p),
            Message::ContextUpdate(p) => serde_json::to_value(p),
            Message::ActivitySync(p) => serde_json::to_value(p),
            Message::TaskStarted(p) => serde_json::to_value(p),
            Message::TaskStopped(p) => serde_json::to_value(p),
            Message::TaskActivity(p) => serde_json::to_value(p),
            Message::Stats(p) => serde_json::to_value(p),
            Message::Unknown { payload, .. } => Ok(payload.clone()),
        };
        value.map_err(BusError::Serialization)
    }
}

fn decode<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> Result<T, BusError> {
    // `{}` and `null` both stand for an empty payload
    let payload = if payload.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(|source| BusError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Payload of `identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    /// The identity this connection claims.
    pub client_id: ClientId,
}

/// Payload of `ping` and `pong`. Carries nothing; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {}

/// Payload of `file_open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpen {
    /// Absolute path of the file to open.
    pub file_path: String,
    /// 1-based line to reveal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// 1-based column to reveal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// Outcome of a file open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOpenStatus {
    /// The file was opened.
    Opened,
    /// The file could not be opened.
    Failed,
}

/// Payload of `file_opened`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpened {
    /// Path from the originating request.
    pub file_path: String,
    /// Whether the open succeeded.
    pub status: FileOpenStatus,
    /// Failure description when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `learning_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningUpdate {
    /// Records in the order they changed.
    pub records: Vec<LearningRecord>,
}

/// Payload of `context_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextUpdate {
    /// File focused in the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    /// Root of the workspace the sender has open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
    /// Files currently open in the sender.
    #[serde(default)]
    pub open_files: Vec<String>,
}

/// Payload of `activity_sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySync {
    /// Activity name, e.g. `edit`, `save`, `command`.
    pub activity: String,
    /// File the activity concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Payload of `task_started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStarted {
    /// Task identifier.
    pub task_id: String,
    /// Human-readable title.
    pub title: String,
    /// Start time (epoch milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
}

/// Payload of `task_stopped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStopped {
    /// Task identifier.
    pub task_id: String,
    /// Why the task ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// How long the task ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Payload of `task_activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskActivity {
    /// Task identifier.
    pub task_id: String,
    /// Activity name.
    pub activity: String,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Payload of `stats`: broker counters, reset only on broker restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Connections accepted since start.
    pub total_connections: u64,
    /// Identified connections currently open.
    pub active_connections: u64,
    /// Envelopes received per type since start.
    pub messages_by_type: BTreeMap<String, u64>,
    /// Seconds since the broker started.
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_type_names_roundtrip() {
        for known in MessageType::KNOWN.iter() {
            assert_eq!(&MessageType::parse(known.as_str()), known);
            assert!(known.is_known());
        }
    }

    #[test]
    fn unrecognised_type_is_preserved() {
        let parsed = MessageType::parse("selection_changed");
        assert_eq!(parsed, MessageType::Unknown("selection_changed".into()));
        assert_eq!(parsed.as_str(), "selection_changed");
        assert!(!parsed.is_known());
    }

    #[test]
    fn file_open_decodes_camel_case() {
        let msg = Message::from_parts(
            "file_open",
            json!({"filePath": "C:/test.ts", "lineNumber": 42}),
        )
        .unwrap();

        match msg {
            Message::FileOpen(open) => {
                assert_eq!(open.file_path, "C:/test.ts");
                assert_eq!(open.line_number, Some(42));
                assert_eq!(open.column_number, None);
            }
            other => panic!("Expected FileOpen, got {:?}", other),
        }
    }

    #[test]
    fn known_type_with_bad_payload_is_an_error() {
        let result = Message::from_parts("file_open", json!({"lineNumber": "forty-two"}));
        assert!(matches!(
            result,
            Err(BusError::InvalidPayload { ref kind, .. }) if kind == "file_open"
        ));
    }

    #[test]
    fn unknown_type_keeps_raw_payload() {
        let payload = json!({"anything": [1, 2, 3]});
        let msg = Message::from_parts("future_thing", payload.clone()).unwrap();

        assert_eq!(msg.message_type(), MessageType::Unknown("future_thing".into()));
        assert_eq!(msg.payload_value().unwrap(), payload);
    }

    #[test]
    fn heartbeat_accepts_null_and_extra_fields() {
        assert!(matches!(
            Message::from_parts("ping", serde_json::Value::Null).unwrap(),
            Message::Ping(_)
        ));
        assert!(matches!(
            Message::from_parts("pong", json!({"t": 5})).unwrap(),
            Message::Pong(_)
        ));
    }

    #[test]
    fn optional_fields_are_omitted_when_empty() {
        let msg = Message::FileOpened(FileOpened {
            file_path: "C:/test.ts".into(),
            status: FileOpenStatus::Opened,
            error: None,
        });
        let value = msg.payload_value().unwrap();
        assert_eq!(value, json!({"filePath": "C:/test.ts", "status": "opened"}));
    }

    #[test]
    fn stats_payload_shape() {
        let mut by_type = BTreeMap::new();
        by_type.insert("file_open".to_string(), 3);
        let stats = BrokerStats {
            total_connections: 4,
            active_connections: 2,
            messages_by_type: by_type,
            uptime_seconds: 60,
        };

        let value = Message::Stats(stats).payload_value().unwrap();
        assert_eq!(value["totalConnections"], 4);
        assert_eq!(value["activeConnections"], 2);
        assert_eq!(value["messagesByType"]["file_open"], 3);
        assert_eq!(value["uptimeSeconds"], 60);
    }
}
