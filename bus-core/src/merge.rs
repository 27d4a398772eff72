//! Idempotent merge of inbound learning records.
//!
//! Records are keyed by `(id, origin)`. Applying the same batch twice leaves
//! the store exactly as applying it once; when two updates share a key the
//! one with the newer `timestamp` wins.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use bus_types::{ClientId, LearningRecord, RecordKey, RecordKind};
use thiserror::Error;

/// Errors reported by a learning store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record has no origin and none could be inferred.
    #[error("record {0} has no origin")]
    MissingOrigin(String),

    /// The backing storage failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record with this key existed.
    Inserted,
    /// An older record was replaced.
    Updated,
    /// The stored record is as new or newer; nothing changed.
    Unchanged,
}

/// Filter for [`LearningStore::list_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records of this kind.
    pub kind: Option<RecordKind>,
    /// Only records from this application.
    pub origin: Option<ClientId>,
}

impl RecordFilter {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one kind.
    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to one origin.
    pub fn with_origin(mut self, origin: ClientId) -> Self {
        self.origin = Some(origin);
        self
    }

    fn matches(&self, record: &LearningRecord) -> bool {
        self.kind.map_or(true, |k| record.kind == k)
            && self.origin.map_or(true, |o| record.origin == Some(o))
    }
}

/// Storage collaborator for learning records.
///
/// The host application supplies the real implementation (for example a
/// SQLite table); the coordinator only ever talks to this trait.
pub trait LearningStore: Send + Sync {
    /// Insert or replace a record by `(id, origin)`, newer timestamp wins.
    ///
    /// The record must carry an origin.
    fn upsert_record(&self, record: LearningRecord) -> Result<UpsertOutcome, StoreError>;

    /// List stored records matching `filter`, ordered by key.
    fn list_records(&self, filter: RecordFilter) -> Result<Vec<LearningRecord>, StoreError>;
}

/// In-memory learning store.
///
/// Cloning yields another handle to the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<BTreeMap<RecordKey, LearningRecord>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Look up one record.
    pub fn get(&self, key: &RecordKey) -> Option<LearningRecord> {
        self.read().get(key).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RecordKey, LearningRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl LearningStore for MemoryStore {
    fn upsert_record(&self, record: LearningRecord) -> Result<UpsertOutcome, StoreError> {
        let key = record
            .key()
            .ok_or_else(|| StoreError::MissingOrigin(record.id.clone()))?;
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());

        let outcome = match records.get(&key) {
            None => UpsertOutcome::Inserted,
            Some(existing) if existing.timestamp >= record.timestamp => {
                return Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => UpsertOutcome::Updated,
        };
        records.insert(key, record);
        Ok(outcome)
    }

    fn list_records(&self, filter: RecordFilter) -> Result<Vec<LearningRecord>, StoreError> {
        Ok(self
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

/// Counts from merging one inbound batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// New records.
    pub inserted: usize,
    /// Replaced older records.
    pub updated: usize,
    /// Duplicates or stale updates.
    pub unchanged: usize,
    /// Records the store refused.
    pub failed: usize,
}

impl MergeSummary {
    /// Whether the batch changed the store.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Upsert every record of an inbound batch.
///
/// Records without an origin are attributed to `sender`, the envelope's
/// source. Store failures are counted, not propagated: one bad record never
/// blocks the rest of the batch.
pub fn merge_batch<S: LearningStore + ?Sized>(
    store: &S,
    records: Vec<LearningRecord>,
    sender: ClientId,
) -> (MergeSummary, Vec<StoreError>) {
    let mut summary = MergeSummary::default();
    let mut errors = Vec::new();

    for mut record in records {
        if record.origin.is_none() {
            record.origin = Some(sender);
        }
        match store.upsert_record(record) {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,
            Ok(UpsertOutcome::Unchanged) => summary.unchanged += 1,
            Err(e) => {
                summary.failed += 1;
                errors.push(e);
            }
        }
    }

    (summary, errors)
}
