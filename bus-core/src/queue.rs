//! Outbound queue for the bus connector.
//!
//! Envelopes sent while the connector is not connected wait here. The queue
//! is bounded: when full, the oldest envelope is evicted to admit the newest,
//! so a long outage keeps the most recent traffic.
//!
//! Envelopes flow through the queue in this order:
//! 1. `push()` - add to the back (evicting the front if full)
//! 2. `pop()` - take the front for transmission
//! 3. `requeue()` - put it back at the front if transmission failed

use std::collections::VecDeque;

use bus_types::Envelope;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Bounded FIFO of envelopes awaiting a connection.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    queue: VecDeque<Envelope>,
    evicted: u64,
}

impl OutboundQueue {
    /// Create a new queue holding at most `capacity` envelopes.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
            evicted: 0,
        }
    }

    /// Add an envelope to the back of the queue.
    ///
    /// Returns the evicted envelope when the queue was full.
    pub fn push(&mut self, envelope: Envelope) -> Option<Envelope> {
        let evicted = if self.queue.len() >= self.capacity {
            self.evicted += 1;
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(envelope);
        evicted
    }

    /// Remove and return the oldest envelope.
    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    /// Return an envelope taken with `pop()` to the front of the queue.
    ///
    /// Used when transmission fails mid-drain so the envelope is retried
    /// first on the next connection.
    pub fn requeue(&mut self, envelope: Envelope) {
        if self.queue.len() >= self.capacity {
            // Only reachable if something was pushed between pop and requeue;
            // the requeued envelope is older than everything queued.
            self.evicted += 1;
            return;
        }
        self.queue.push_front(envelope);
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of envelopes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Iterate over queued envelopes, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.queue.iter()
    }

    /// Drop all queued envelopes.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
