//! # bus-broker
//!
//! Loopback relay for the Tandem inter-application message bus.
//!
//! The broker is a "dumb pipe" between exactly two peers:
//! - Accepts WebSocket connections on a single loopback port
//! - Requires each connection to `identify` as `editor` or `agent`
//! - Forwards every other envelope to the peer, stamping `source` if absent
//! - Answers `ping` itself and broadcasts `stats` periodically
//! - Never queues: if the peer is absent, the message is dropped
//!
//! ## Architecture
//!
//! ```text
//!  editor ──┐                         ┌── agent
//!           │   ws://127.0.0.1:3004   │
//!           ├────────────────────────►│
//!       ┌───┴─────────────────────────┴───┐
//!       │          tandem-broker          │
//!       │  session ─► writer (per conn)   │
//!       │  /health  /metrics              │
//!       └─────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod listener;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use config::Config;
pub use error::{BrokerError, ProtocolError, Result};
pub use listener::BrokerServer;
pub use server::Broker;
