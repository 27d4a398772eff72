//! Broker state shared by every connection.
//!
//! The broker tracks at most one active connection per [`ClientId`] and the
//! counters reported in `stats`. Everything else lives in the per-connection
//! [`Session`](crate::session::Session).

use crate::config::Config;
use bus_types::{BrokerStats, ClientId, CLOSE_SUPERSEDED};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Operational metrics for monitoring broker activity.
///
/// Counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    /// Total WebSocket connections accepted (before identification).
    pub connections_total: AtomicU64,
    /// Envelopes received per message type.
    pub messages_by_type: DashMap<String, u64>,
    /// Envelopes forwarded to a peer.
    pub relayed_total: AtomicU64,
    /// Envelopes dropped because the peer was not connected.
    pub undeliverable_total: AtomicU64,
    /// Frames dropped as malformed or oversize, or because the recipient's
    /// writer buffer was full.
    pub errors_total: AtomicU64,
    /// Connections closed for failing to identify.
    pub identify_failures: AtomicU64,
    /// Connections replaced by a newer one for the same client.
    pub superseded_total: AtomicU64,
}

impl BrokerMetrics {
    /// Count one received envelope of `kind`.
    pub fn record_message(&self, kind: &str) {
        *self.messages_by_type.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Per-type counts, sorted by type name.
    pub fn messages_by_type(&self) -> std::collections::BTreeMap<String, u64> {
        self.messages_by_type
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Something for a connection's writer task to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send a text frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

/// Why a frame was not queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The writer buffer is full; the peer is not reading.
    Full,
    /// The writer has gone away.
    Closed,
}

/// Handle to an identified connection's writer task.
///
/// The writer channel is bounded (`limits.outbound_buffer`), so a stalled
/// socket costs at most that many frames.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Wrap a writer channel.
    pub fn new(id: u64, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// Connection id, unique for the broker's lifetime.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: String) -> Result<(), QueueError> {
        self.tx
            .try_send(Outbound::Frame(frame))
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full,
                TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Queue a close frame. With a full buffer the close is queued behind
    /// the backlog from a spawned task.
    pub fn close(&self, code: u16, reason: &'static str) {
        let close = Outbound::Close { code, reason };
        if let Err(TrySendError::Full(close)) = self.tx.try_send(close) {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(close).await;
            });
        }
    }
}

/// Close code sent to clients when the broker shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// The broker.
pub struct Broker {
    config: Config,
    started_at: Instant,
    metrics: BrokerMetrics,
    next_connection_id: AtomicU64,
    /// Active connection per client. Replaced, never queued.
    connections: DashMap<ClientId, ConnectionHandle>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("active_connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Create a broker with the given config.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            metrics: BrokerMetrics::default(),
            next_connection_id: AtomicU64::new(1),
            connections: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the broker configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    /// Count a newly accepted connection and assign it an id.
    pub fn accept_connection(&self) -> u64 {
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Make `handle` the active connection for `client_id`.
    ///
    /// A prior connection for the same client is told to close with the
    /// superseded code and returned.
    pub fn register(
        &self,
        client_id: ClientId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let id = handle.id();
        if self.closed.load(Ordering::SeqCst) {
            handle.close(CLOSE_GOING_AWAY, "broker shutting down");
            return None;
        }
        let prior = self.connections.insert(client_id, handle.clone());

        // close_all may have run between the check and the insert
        if self.closed.load(Ordering::SeqCst) && self.unregister(client_id, id) {
            handle.close(CLOSE_GOING_AWAY, "broker shutting down");
        }

        if let Some(prior) = &prior {
            tracing::info!(
                "Connection {} for {} superseded by {}",
                prior.id(),
                client_id,
                id
            );
            self.metrics.superseded_total.fetch_add(1, Ordering::Relaxed);
            prior.close(CLOSE_SUPERSEDED, "superseded");
        }

        tracing::debug!(
            "Registered {} as connection {} (active: {})",
            client_id,
            id,
            self.connections.len()
        );
        prior
    }

    /// Remove `client_id`'s entry, but only if it still points at
    /// `connection_id`. Returns whether anything was removed.
    pub fn unregister(&self, client_id: ClientId, connection_id: u64) -> bool {
        let removed = self
            .connections
            .remove_if(&client_id, |_, handle| handle.id() == connection_id)
            .is_some();

        if removed {
            tracing::debug!(
                "Unregistered {} connection {} (active: {})",
                client_id,
                connection_id,
                self.connections.len()
            );
        }
        removed
    }

    /// Close every active connection and refuse later registrations.
    pub fn close_all(&self, code: u16, reason: &'static str) {
        self.closed.store(true, Ordering::SeqCst);
        for client_id in ClientId::ALL {
            if let Some((_, handle)) = self.connections.remove(&client_id) {
                tracing::debug!("Closing {} connection {}", client_id, handle.id());
                handle.close(code, reason);
            }
        }
    }

    /// Deliver a frame to `to` if it is connected. No queueing beyond the
    /// connection's writer buffer.
    pub fn forward(&self, to: ClientId, frame: String) -> bool {
        let result = self.connections.get(&to).map(|conn| conn.send(frame));

        match result {
            Some(Ok(())) => {
                self.metrics.relayed_total.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(Err(QueueError::Full)) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{} is not keeping up, dropping message", to);
                false
            }
            Some(Err(QueueError::Closed)) | None => {
                self.metrics
                    .undeliverable_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("{} not connected, dropping message", to);
                false
            }
        }
    }

    /// Send a frame to every active connection. Returns how many took it.
    pub fn broadcast(&self, frame: &str) -> usize {
        let mut sent = 0;
        for entry in self.connections.iter() {
            match entry.value().send(frame.to_string()) {
                Ok(()) => sent += 1,
                Err(QueueError::Full) => {
                    self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{} is not keeping up, dropping broadcast", entry.key());
                }
                Err(QueueError::Closed) => {}
            }
        }
        sent
    }

    /// Whether `client_id` has an active connection.
    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.connections.contains_key(&client_id)
    }

    /// Number of identified, open connections.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Seconds since the broker was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Snapshot of the counters carried by `stats`.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            total_connections: self.metrics.connections_total.load(Ordering::Relaxed),
            active_connections: self.active_connections() as u64,
            messages_by_type: self.metrics.messages_by_type(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}
