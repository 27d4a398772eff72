//! # bus-core
//!
//! Pure protocol logic for the Tandem bus (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms behind the
//! client connector and the sync coordinator without any network I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time is passed in as an argument rather than read
//! from a clock, so every transition is deterministic and testable.
//!
//! The actual I/O (WebSocket, timers) is performed by `bus-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod merge;
pub mod queue;
pub mod state;

pub use batch::{BatchPush, SyncBatch, DEFAULT_BATCH_CAPACITY, DEFAULT_DEBOUNCE};
pub use merge::{
    merge_batch, LearningStore, MemoryStore, MergeSummary, RecordFilter, StoreError, UpsertOutcome,
};
pub use queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use state::{Action, BackoffPolicy, ConnectionState, ConnectionStatus, Event};
