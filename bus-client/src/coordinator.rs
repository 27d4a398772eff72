//! Sync coordinator - debounced learning-record sync over a connector.
//!
//! Outbound, the host reports each changed record with
//! [`SyncCoordinator::record_changed`]; changes are batched and emitted as a
//! single `learning_update` once the debounce window closes (or the batch
//! fills). Inbound, every `learning_update` from the peer is merged into the
//! [`LearningStore`] idempotently, so at-least-once delivery is harmless.

use std::sync::Arc;
use std::time::Duration;

use bus_core::{
    merge_batch, BatchPush, LearningStore, SyncBatch, DEFAULT_BATCH_CAPACITY, DEFAULT_DEBOUNCE,
};
use bus_types::{ClientId, Envelope, LearningRecord, LearningUpdate, Message, MessageType};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::{ClientError, Connector};

/// Configuration for a [`SyncCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Records that force an immediate flush.
    pub batch_capacity: usize,
    /// Quiet period before a batch is sent.
    pub debounce: Duration,
}

impl CoordinatorConfig {
    /// Set the batch capacity.
    pub fn with_batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

enum CoordinatorCommand {
    RecordChanged(LearningRecord),
    Inbound(Envelope),
    Flush(oneshot::Sender<usize>),
    Stop(oneshot::Sender<usize>),
}

/// Handle to a running sync coordinator.
///
/// The task stops on [`SyncCoordinator::stop`] or when every handle is
/// dropped; either way pending records are flushed first. The task owns a
/// [`Connector`] clone, which it releases when it ends.
#[derive(Clone)]
pub struct SyncCoordinator {
    commands: mpsc::UnboundedSender<CoordinatorCommand>,
    store: Arc<dyn LearningStore>,
}

impl SyncCoordinator {
    /// Spawn a coordinator that sends through `connector` and merges into
    /// `store`.
    ///
    /// Registers a `learning_update` handler on the connector.
    pub fn spawn(
        connector: Connector,
        store: Arc<dyn LearningStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        // Weak so the connector's handler does not keep this task alive
        let inbound = commands_tx.downgrade();
        connector.on(MessageType::LearningUpdate, move |envelope| {
            match inbound.upgrade() {
                Some(tx) => {
                    let _ = tx.send(CoordinatorCommand::Inbound(envelope.clone()));
                }
                None => debug!("coordinator stopped, learning update not merged"),
            }
        });

        let task = CoordinatorTask {
            local: connector.client_id(),
            connector,
            store: Arc::clone(&store),
            batch: SyncBatch::new(config.batch_capacity, config.debounce),
            commands: commands_rx,
        };
        tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            store,
        }
    }

    /// Report a changed record. It is sent with the next batch.
    ///
    /// Records without an origin are stamped with the local client id.
    pub fn record_changed(&self, record: LearningRecord) {
        if self
            .commands
            .send(CoordinatorCommand::RecordChanged(record))
            .is_err()
        {
            debug!("coordinator stopped, change ignored");
        }
    }

    /// Send pending records now, bypassing the debounce window.
    ///
    /// Returns how many records were emitted.
    pub async fn flush(&self) -> Result<usize, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CoordinatorCommand::Flush(tx))
            .map_err(|_| ClientError::Stopped("coordinator"))?;
        rx.await.map_err(|_| ClientError::Stopped("coordinator"))
    }

    /// Flush pending records and stop the coordinator.
    ///
    /// Returns how many records the final flush emitted.
    pub async fn stop(&self) -> Result<usize, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(CoordinatorCommand::Stop(tx))
            .map_err(|_| ClientError::Stopped("coordinator"))?;
        rx.await.map_err(|_| ClientError::Stopped("coordinator"))
    }

    /// The store inbound batches are merged into.
    pub fn store(&self) -> Arc<dyn LearningStore> {
        Arc::clone(&self.store)
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator").finish_non_exhaustive()
    }
}

struct CoordinatorTask {
    local: ClientId,
    connector: Connector,
    store: Arc<dyn LearningStore>,
    batch: SyncBatch,
    commands: mpsc::UnboundedReceiver<CoordinatorCommand>,
}

impl CoordinatorTask {
    async fn run(mut self) {
        loop {
            let deadline = self.batch.deadline().map(Instant::from_std);
            let command = tokio::select! {
                command = self.commands.recv() => command,
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    if let Some(records) = self.batch.take_due(Instant::now().into_std()) {
                        self.emit(records);
                    }
                    continue;
                }
            };

            match command {
                Some(CoordinatorCommand::RecordChanged(record)) => self.record_changed(record),
                Some(CoordinatorCommand::Inbound(envelope)) => self.merge(envelope),
                Some(CoordinatorCommand::Flush(reply)) => {
                    let count = self.flush();
                    let _ = reply.send(count);
                }
                Some(CoordinatorCommand::Stop(reply)) => {
                    let count = self.flush();
                    let _ = reply.send(count);
                    break;
                }
                None => {
                    self.flush();
                    break;
                }
            }
        }
        debug!("coordinator task stopped");
    }

    fn record_changed(&mut self, mut record: LearningRecord) {
        if record.origin.is_none() {
            record.origin = Some(self.local);
        }
        if let BatchPush::Flush(records) = self.batch.push(record, Instant::now().into_std()) {
            debug!(count = records.len(), "batch full, flushing early");
            self.emit(records);
        }
    }

    fn flush(&mut self) -> usize {
        let records = self.batch.take();
        let count = records.len();
        if count > 0 {
            self.emit(records);
        }
        count
    }

    fn emit(&self, records: Vec<LearningRecord>) {
        info!(count = records.len(), "sending learning update");
        self.connector
            .send(Message::LearningUpdate(LearningUpdate { records }));
    }

    fn merge(&self, envelope: Envelope) {
        let Message::LearningUpdate(update) = envelope.message else {
            return;
        };
        let sender = envelope.source.unwrap_or_else(|| self.local.peer());
        let received = update.records.len();

        let (summary, errors) = merge_batch(self.store.as_ref(), update.records, sender);
        for error in &errors {
            warn!(%error, "failed to store learning record");
        }
        info!(
            received,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "merged learning update"
        );
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
