//! Prometheus metrics endpoint.

use crate::server::Broker;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
pub async fn metrics_handler(Extension(broker): Extension<Arc<Broker>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&broker),
    )
}

/// Render all broker metrics.
pub fn render(broker: &Broker) -> String {
    let m = broker.metrics();

    // Gauges
    let active = broker.active_connections();
    let uptime = broker.uptime_seconds();

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let relayed = m.relayed_total.load(Ordering::Relaxed);
    let undeliverable = m.undeliverable_total.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let identify_failures = m.identify_failures.load(Ordering::Relaxed);
    let superseded = m.superseded_total.load(Ordering::Relaxed);

    let mut body = format!(
        r#"# HELP tandem_broker_connections_active Number of identified connections
# TYPE tandem_broker_connections_active gauge
tandem_broker_connections_active {active}

# HELP tandem_broker_uptime_seconds Seconds since the broker started
# TYPE tandem_broker_uptime_seconds gauge
tandem_broker_uptime_seconds {uptime}

# HELP tandem_broker_info Server information
# TYPE tandem_broker_info gauge
tandem_broker_info{{version="{version}"}} 1

# HELP tandem_broker_connections_total Total connections accepted
# TYPE tandem_broker_connections_total counter
tandem_broker_connections_total {conns_total}

# HELP tandem_broker_relayed_total Envelopes forwarded to a peer
# TYPE tandem_broker_relayed_total counter
tandem_broker_relayed_total {relayed}

# HELP tandem_broker_undeliverable_total Envelopes dropped because the peer was offline
# TYPE tandem_broker_undeliverable_total counter
tandem_broker_undeliverable_total {undeliverable}

# HELP tandem_broker_errors_total Frames dropped as malformed, oversize or unsendable
# TYPE tandem_broker_errors_total counter
tandem_broker_errors_total {errors}

# HELP tandem_broker_identify_failures_total Connections closed for failing to identify
# TYPE tandem_broker_identify_failures_total counter
tandem_broker_identify_failures_total {identify_failures}

# HELP tandem_broker_superseded_total Connections replaced by a newer one
# TYPE tandem_broker_superseded_total counter
tandem_broker_superseded_total {superseded}

# HELP tandem_broker_messages_total Envelopes received by type
# TYPE tandem_broker_messages_total counter
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    for (kind, count) in m.messages_by_type() {
        let _ = writeln!(
            body,
            "tandem_broker_messages_total{{type=\"{}\"}} {count}",
            escape_label(&kind)
        );
    }
    body
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
