//! Learning records synchronized between the two applications.

use serde::{Deserialize, Serialize};

use crate::ClientId;

/// Kind of learning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// A recorded mistake and its resolution.
    Mistake,
    /// A piece of captured knowledge.
    Knowledge,
}

/// A single learning record as carried in a `learning_update` batch.
///
/// Records are identified by `(id, origin)`: each application allocates its
/// own ids, so the same id from different origins names different records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    /// Record id, unique within its origin.
    pub id: String,
    /// Mistake or knowledge.
    pub kind: RecordKind,
    /// Application that created the record. Filled in by the sending
    /// coordinator when the host leaves it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ClientId>,
    /// Last modification time (epoch milliseconds). Newer wins on conflict.
    pub timestamp: u64,
    /// Record body, opaque to the bus.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl LearningRecord {
    /// Create a record without an origin; the coordinator stamps it on send.
    pub fn new(
        id: impl Into<String>,
        kind: RecordKind,
        timestamp: u64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            origin: None,
            timestamp,
            data,
        }
    }

    /// Set the origin application.
    pub fn with_origin(mut self, origin: ClientId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The merge key, if the record has an origin.
    pub fn key(&self) -> Option<RecordKey> {
        self.origin.map(|origin| RecordKey {
            id: self.id.clone(),
            origin,
        })
    }
}

/// Merge key for learning records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Record id.
    pub id: String,
    /// Origin application.
    pub origin: ClientId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_uses_camel_case_on_the_wire() {
        let record = LearningRecord::new(
            "m-1",
            RecordKind::Mistake,
            1_700_000_000_000,
            json!({"text": "off by one"}),
        )
        .with_origin(ClientId::Agent);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "mistake");
        assert_eq!(value["origin"], "agent");
        assert_eq!(value["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn record_without_origin_has_no_key() {
        let record = LearningRecord::new("k-1", RecordKind::Knowledge, 1, json!({}));
        assert!(record.key().is_none());

        let keyed = record.with_origin(ClientId::Editor);
        assert_eq!(
            keyed.key(),
            Some(RecordKey {
                id: "k-1".into(),
                origin: ClientId::Editor
            })
        );
    }

    #[test]
    fn missing_data_defaults_to_null() {
        let record: LearningRecord =
            serde_json::from_str(r#"{"id":"x","kind":"knowledge","timestamp":5}"#).unwrap();
        assert!(record.data.is_null());
        assert!(record.origin.is_none());
    }
}
