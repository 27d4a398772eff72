//! Identity types for the bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::BusError;

/// Logical identity of one of the two peer applications.
///
/// The bus connects exactly two applications, so this is a closed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientId {
    /// The code editor application.
    Editor,
    /// The desktop agent application.
    Agent,
}

impl ClientId {
    /// Both client identities, in a stable order.
    pub const ALL: [ClientId; 2] = [ClientId::Editor, ClientId::Agent];

    /// The other application on the bus.
    pub fn peer(self) -> Self {
        match self {
            ClientId::Editor => ClientId::Agent,
            ClientId::Agent => ClientId::Editor,
        }
    }

    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientId::Editor => "editor",
            ClientId::Agent => "agent",
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientId {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "editor" => Ok(ClientId::Editor),
            "agent" => Ok(ClientId::Agent),
            other => Err(BusError::InvalidClientId(other.to_string())),
        }
    }
}

/// A unique message identifier.
///
/// UUID v4 on the sending side; any non-empty string is accepted on receipt
/// so that peers built with other libraries interoperate.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create a new random MessageId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received from the wire.
    pub fn from_wire(id: impl Into<String>) -> Result<Self, BusError> {
        let id = id.into();
        if id.is_empty() {
            return Err(BusError::MissingField("messageId"));
        }
        Ok(Self(id))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "MessageId({short})")
    }
}
