//! Error types for the bus wire contract.

use thiserror::Error;

/// Errors that can occur while encoding or decoding bus envelopes.
#[derive(Debug, Error)]
pub enum BusError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A required envelope field was absent or empty
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The client identity is not one of the two known peers
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    /// A known message type carried a payload of the wrong shape
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The message type whose payload failed to decode.
        kind: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}
