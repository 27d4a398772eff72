//! # bus-client
//!
//! Client library for the Tandem inter-application message bus.
//!
//! This is the library host applications embed to talk to their peer.
//!
//! ## Features
//!
//! - **Resilient connection**: reconnect with exponential backoff, ping/pong
//!   health check, bounded offline queue
//! - **Typed handlers**: subscribe per message type, dispatched in arrival
//!   order on a single event loop
//! - **Debounced sync**: [`SyncCoordinator`] batches learning-record changes
//!   and merges inbound batches idempotently
//! - **Transport abstraction**: WebSocket in production, in-memory mock in
//!   tests
//!
//! ## Example
//!
//! ```ignore
//! use bus_client::{Connector, ConnectorConfig, SyncCoordinator, CoordinatorConfig};
//! use bus_core::MemoryStore;
//!
//! let connector = Connector::websocket(ConnectorConfig::new(ClientId::Agent));
//! let coordinator = SyncCoordinator::spawn(
//!     connector.clone(),
//!     Arc::new(MemoryStore::new()),
//!     CoordinatorConfig::default(),
//! );
//! connector.connect();
//! coordinator.record_changed(record);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connector;
pub mod coordinator;
mod error;
pub mod handlers;
pub mod transport;

pub use connector::{Connector, ConnectorConfig, WeakConnector, DEFAULT_URL};
pub use coordinator::{CoordinatorConfig, SyncCoordinator};
pub use error::ClientError;
pub use handlers::{Handler, HandlerRegistry};
pub use transport::{MockTransport, Transport, TransportError, WebSocketTransport};

pub use bus_core::ConnectionStatus;
