//! Error types for tandem-broker.

use bus_types::BusError;

/// Main error type for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-frame and per-connection protocol errors.
///
/// None of these are fatal to the broker. Frame errors drop the frame;
/// identification errors close only the offending connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a valid envelope.
    #[error("invalid envelope: {0}")]
    Envelope(#[from] BusError),

    /// The frame exceeds the configured size limit.
    #[error("message too large: {size} > {limit}")]
    TooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The first message was not `identify`.
    #[error("expected identify, got {actual}")]
    NotIdentified {
        /// Type of the message that arrived instead.
        actual: String,
    },

    /// No `identify` arrived within the timeout.
    #[error("identify timeout after {0}s")]
    IdentifyTimeout(u64),

    /// The connection ended.
    #[error("connection closed")]
    Closed,

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
