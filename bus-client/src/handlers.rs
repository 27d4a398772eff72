//! Handler registry: message type to subscribed callbacks.

use std::collections::HashMap;
use std::fmt;

use bus_types::{Envelope, MessageType};

/// A message handler.
///
/// Runs on the connector's event loop, so it must not block. To reply,
/// capture a [`WeakConnector`](crate::WeakConnector) and call `send`; a
/// strong `Connector` clone would keep the task alive forever.
pub type Handler = Box<dyn Fn(&Envelope) + Send + Sync + 'static>;

/// Subscriptions keyed by message type, plus catch-all subscribers.
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: HashMap<MessageType, Vec<Handler>>,
    any: Vec<Handler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one message type.
    pub fn on(&mut self, message_type: MessageType, handler: Handler) {
        self.by_type.entry(message_type).or_default().push(handler);
    }

    /// Subscribe to every message.
    pub fn on_any(&mut self, handler: Handler) {
        self.any.push(handler);
    }

    /// Invoke matching handlers in registration order, typed first.
    ///
    /// Returns how many handlers ran.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let typed = self
            .by_type
            .get(&envelope.message_type())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for handler in typed.iter().chain(self.any.iter()) {
            handler(envelope);
        }
        typed.len() + self.any.len()
    }

    /// Number of handlers for a type, catch-alls excluded.
    pub fn count(&self, message_type: &MessageType) -> usize {
        self.by_type.get(message_type).map_or(0, Vec::len)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<(&str, usize)> = self
            .by_type
            .iter()
            .map(|(t, hs)| (t.as_str(), hs.len()))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("by_type", &types)
            .field("any", &self.any.len())
            .finish()
    }
}
