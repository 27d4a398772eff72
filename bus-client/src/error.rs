//! Client error types.

use bus_types::BusError;
use thiserror::Error;

use crate::transport::TransportError;

/// Client errors.
///
/// These stay inside the client: the public send/subscribe surface never
/// returns them, hosts only see the coarse connection status.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Envelope encode/decode error.
    #[error("protocol error: {0}")]
    Protocol(#[from] BusError),

    /// The background task has stopped.
    #[error("{0} task has stopped")]
    Stopped(&'static str),
}
