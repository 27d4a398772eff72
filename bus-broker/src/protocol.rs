//! Frame validation and routing decisions.
//!
//! The broker only looks at the outer envelope shape. Payloads are never
//! interpreted except for `identify`, so unknown message types relay as-is.

use crate::error::{ProtocolError, ProtocolResult};
use bus_types::{ClientId, Envelope, Heartbeat, Message, MessageType, RawEnvelope};

/// Maximum message size (1MB) when no limit is configured.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// What to do with a frame from an identified connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Answer the sender directly.
    Reply(String),
    /// Forward to the named peer.
    Relay {
        /// Recipient.
        to: ClientId,
        /// Frame to deliver.
        frame: String,
    },
    /// Nothing to deliver.
    Ignore,
}

/// Parse a text frame into a raw envelope, enforcing the size limit.
pub fn parse_frame(text: &str, limit: usize) -> ProtocolResult<RawEnvelope> {
    if text.len() > limit {
        return Err(ProtocolError::TooLarge {
            size: text.len(),
            limit,
        });
    }
    Ok(RawEnvelope::from_json(text)?)
}

/// Extract the claimed identity from a connection's first envelope.
pub fn parse_identify(raw: RawEnvelope) -> ProtocolResult<ClientId> {
    match Message::from_parts(&raw.kind, raw.payload)? {
        Message::Identify(identify) => Ok(identify.client_id),
        other => Err(ProtocolError::NotIdentified {
            actual: other.message_type().as_str().to_string(),
        }),
    }
}

/// Decide where a valid frame from `sender` goes.
///
/// Frames that already carry a `source` are forwarded byte for byte; others
/// are re-encoded with the sender stamped in.
pub fn route(text: &str, mut raw: RawEnvelope, sender: ClientId) -> ProtocolResult<Route> {
    match raw.message_type() {
        MessageType::Ping => Ok(Route::Reply(pong_frame()?)),
        MessageType::Identify => Ok(Route::Ignore),
        _ => {
            let frame = match raw.source {
                Some(source) => {
                    if source != sender {
                        tracing::debug!(%source, %sender, "source differs from identified client");
                    }
                    text.to_string()
                }
                None => {
                    raw.source = Some(sender);
                    raw.to_json()?
                }
            };
            Ok(Route::Relay {
                to: sender.peer(),
                frame,
            })
        }
    }
}

/// A broker-originated `pong`.
pub fn pong_frame() -> ProtocolResult<String> {
    Ok(Envelope::from_broker(Message::Pong(Heartbeat::default())).to_json()?)
}
