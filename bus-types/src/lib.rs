//! # bus-types
//!
//! Wire format types for the Tandem inter-application message bus.
//!
//! This crate provides the shared contract used across all Tandem crates:
//! - [`ClientId`], [`MessageId`] - Identity types
//! - [`Envelope`] - Message wrapper with routing metadata
//! - [`Message`] - Typed payloads (FileOpen, LearningUpdate, TaskStarted, etc.)
//! - [`LearningRecord`] - Domain records carried by `learning_update`
//! - [`BusError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;
mod records;

pub use envelope::{now_millis, Envelope, RawEnvelope};
pub use error::BusError;
pub use ids::{ClientId, MessageId};
pub use messages::{
    ActivitySync, BrokerStats, ContextUpdate, FileOpen, FileOpenStatus, FileOpened, Heartbeat,
    Identify, LearningUpdate, Message, MessageType, TaskActivity, TaskStarted, TaskStopped,
};
pub use records::{LearningRecord, RecordKey, RecordKind};

/// WebSocket close code for a connection that failed to identify.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code for a connection replaced by a newer one with the
/// same [`ClientId`].
pub const CLOSE_SUPERSEDED: u16 = 4000;
