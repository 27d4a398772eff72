//! Background stats broadcast.
//!
//! Periodically sends a `stats` envelope with no `source` to every connected
//! client.

use crate::config::StatsConfig;
use crate::server::Broker;
use bus_types::{Envelope, Message};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Spawn the stats broadcast task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_stats_task(broker: Arc<Broker>, config: StatsConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Stats broadcast disabled");
            return;
        }

        let period = config.broadcast_interval();
        tracing::info!("Stats broadcast started (interval: {}s)", period.as_secs());

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            broadcast_stats(&broker);
        }
    })
}

/// Send one `stats` envelope to every connection. Returns the recipient count.
pub fn broadcast_stats(broker: &Broker) -> usize {
    let envelope = Envelope::from_broker(Message::Stats(broker.stats()));
    match envelope.to_json() {
        Ok(frame) => {
            let sent = broker.broadcast(&frame);
            tracing::debug!("Stats sent to {} connections", sent);
            sent
        }
        Err(e) => {
            tracing::error!("Failed to encode stats: {}", e);
            0
        }
    }
}
