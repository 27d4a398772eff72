//! WebSocket transport over `tokio-tungstenite`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use bus_types::CLOSE_SUPERSEDED;

use super::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport.
///
/// The socket is split so that a pending `recv()` never blocks `send()`.
#[derive(Default)]
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        if self.is_connected() {
            self.close().await.ok();
        }

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (write, read) = ws.split();

        *self.sink.lock().await = Some(write);
        *self.stream.lock().await = Some(read);
        self.connected.store(true, Ordering::SeqCst);
        debug!(url, "WebSocket connected");
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let write = sink.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = write.send(Message::Text(frame.to_string())).await {
            self.mark_closed();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;
        let read = stream.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by peer");
                    self.mark_closed();
                    let superseded = frame
                        .as_ref()
                        .is_some_and(|f| u16::from(f.code) == CLOSE_SUPERSEDED);
                    return Err(if superseded {
                        TransportError::Superseded
                    } else {
                        TransportError::ConnectionClosed
                    });
                }
                // Control frames are answered by tungstenite; binary is not
                // part of the bus protocol
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.mark_closed();
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        let write = self.sink.lock().await.take();
        self.stream.lock().await.take();

        if let Some(mut write) = write {
            write
                .close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}
