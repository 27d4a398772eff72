//! Debounced batch of changed learning records.
//!
//! Each change restarts a debounce window. The batch is flushed when the
//! window elapses with no further changes, or immediately once it holds
//! `capacity` records, whichever comes first.

use std::time::{Duration, Instant};

use bus_types::LearningRecord;

/// Default number of records that forces an immediate flush.
pub const DEFAULT_BATCH_CAPACITY: usize = 50;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Outcome of adding a record to the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPush {
    /// Held; flush when the deadline passes.
    Scheduled {
        /// When the debounce window closes.
        deadline: Instant,
    },
    /// Cap reached; send these records now.
    Flush(Vec<LearningRecord>),
}

/// Pending records plus the debounce deadline.
#[derive(Debug)]
pub struct SyncBatch {
    capacity: usize,
    debounce: Duration,
    pending: Vec<LearningRecord>,
    deadline: Option<Instant>,
}

impl SyncBatch {
    /// Create an empty batch.
    pub fn new(capacity: usize, debounce: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            debounce,
            pending: Vec::new(),
            deadline: None,
        }
    }

    /// Append a record and restart the debounce window.
    pub fn push(&mut self, record: LearningRecord, now: Instant) -> BatchPush {
        self.pending.push(record);
        if self.pending.len() >= self.capacity {
            return BatchPush::Flush(self.take());
        }
        let deadline = now + self.debounce;
        self.deadline = Some(deadline);
        BatchPush::Scheduled { deadline }
    }

    /// Take all pending records and clear the deadline.
    pub fn take(&mut self) -> Vec<LearningRecord> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    /// Take pending records if the debounce window has closed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<LearningRecord>> {
        match self.deadline {
            Some(deadline) if now >= deadline && !self.pending.is_empty() => Some(self.take()),
            _ => None,
        }
    }

    /// When the current debounce window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for SyncBatch {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY, DEFAULT_DEBOUNCE)
    }
}
