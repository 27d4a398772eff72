//! Send one message.

use anyhow::{Context, Result};
use bus_client::{Connector, ConnectorConfig};
use bus_types::{ClientId, Message};
use std::time::Duration;

/// Run the send command.
pub async fn run(
    url: &str,
    client: ClientId,
    kind: &str,
    payload: &str,
    timeout: Duration,
) -> Result<()> {
    let message = parse_message(kind, payload)?;
    let connector = Connector::websocket(ConnectorConfig::new(client).with_url(url));

    deliver(&connector, message, timeout).await?;
    println!("Sent {} as {}", kind, client);
    Ok(())
}

/// Build a message from its type name and JSON payload text.
///
/// Unlike `Connector::send_raw`, a payload that does not match a known
/// type's schema is an error here rather than a silent drop.
pub fn parse_message(kind: &str, payload: &str) -> Result<Message> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;
    Message::from_parts(kind, payload).with_context(|| format!("invalid {kind} payload"))
}

/// Connect, send, and shut the connector down once the frame is written.
pub async fn deliver(connector: &Connector, message: Message, timeout: Duration) -> Result<()> {
    super::connect(connector, timeout).await?;
    connector.send(message);
    connector.shutdown();
    connector.closed().await;
    Ok(())
}
