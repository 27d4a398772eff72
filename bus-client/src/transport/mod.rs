//! Transport abstraction for the bus connector.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` opens a connection to the broker URL
//! - `send()` transmits one text frame
//! - `recv()` waits for the next text frame
//! - `close()` gracefully terminates
//!
//! `recv()` must be cancel-safe: the connector polls it inside
//! `tokio::select!` and drops it whenever another branch wins.
//!
//! # Example
//!
//! ```ignore
//! let transport = WebSocketTransport::new();
//! transport.connect("ws://127.0.0.1:3004").await?;
//! transport.send(&envelope.to_json()?).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
///
/// All of these except [`TransportError::Superseded`] are recoverable from
/// the connector's point of view: they end the current connection and
/// trigger a reconnect.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,

    /// The broker closed this connection because another one identified
    /// with the same client id.
    #[error("superseded by a newer connection")]
    Superseded,
}

/// Transport trait for exchanging bus frames with the broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the broker at the given URL, replacing any open connection.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Blocks until a frame arrives or the connection ends.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
