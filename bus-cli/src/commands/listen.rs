//! Print inbound envelopes as JSON lines.

use anyhow::Result;
use bus_client::{ConnectionStatus, Connector, ConnectorConfig};
use bus_types::{ClientId, Envelope};
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Run the listen command until Ctrl-C or `count` envelopes.
pub async fn run(
    url: &str,
    client: ClientId,
    count: Option<usize>,
    timeout: Duration,
) -> Result<()> {
    let connector = Connector::websocket(ConnectorConfig::new(client).with_url(url));
    let mut inbound = subscribe(&connector);
    super::connect(&connector, timeout).await?;
    eprintln!("Listening as {} on {}", client, url);

    let mut status = connector.watch_status();
    let mut stdout = std::io::stdout();
    let mut printed = 0;

    loop {
        tokio::select! {
            envelope = inbound.recv() => {
                let Some(envelope) = envelope else { break };
                print_line(&mut stdout, &envelope)?;
                printed += 1;
                if count.is_some_and(|n| printed >= n) {
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if current != ConnectionStatus::Connected {
                    tracing::warn!("Broker connection {}", current);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    connector.shutdown();
    connector.closed().await;
    Ok(())
}

/// Forward every inbound envelope into a channel.
pub fn subscribe(connector: &Connector) -> mpsc::UnboundedReceiver<Envelope> {
    let (tx, rx) = mpsc::unbounded_channel();
    connector.on_any(move |envelope| {
        let _ = tx.send(envelope.clone());
    });
    rx
}

/// Write one envelope as a single JSON line.
pub fn print_line(out: &mut impl Write, envelope: &Envelope) -> Result<()> {
    writeln!(out, "{}", envelope.to_json()?)?;
    out.flush()?;
    Ok(())
}
