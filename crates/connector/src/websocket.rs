//! WebSocket transport for the press telemetry gateway
//!
//! One pump task owns the socket. It forwards inbound frames as
//! [`TransportEvent`]s and writes outbound text handed over a command channel,
//! so the session never touches the socket directly.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use pressmon_metadata::StreamConfig;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::traits::{Transport, TransportEvent, TransportFactory};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frames buffered between the pump and the session
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Outbound commands buffered for the pump
const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

enum Outbound {
    Text(String),
    Close,
}

/// WebSocket connection to the telemetry gateway
pub struct WebSocketTransport {
    endpoint: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    outbound: Option<mpsc::Sender<Outbound>>,
    pump: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            close_timeout,
            outbound: None,
            pump: None,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.pump.is_some() {
            return Err(TransportError::ConnectionFailed(
                "open() called twice".to_string(),
            ));
        }

        let url = Url::parse(&self.endpoint)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        info!(endpoint = %url, "Connecting to telemetry WebSocket");

        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        info!(status = ?response.status(), "Telemetry WebSocket connected");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        event_tx
            .send(TransportEvent::Opened)
            .await
            .map_err(|_| TransportError::Closed)?;

        self.outbound = Some(outbound_tx);
        self.pump = Some(tokio::spawn(pump(ws, event_tx, outbound_rx)));

        Ok(event_rx)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        outbound
            .send(Outbound::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(outbound) = self.outbound.take() {
            // Pump may already be gone after a peer close; nothing left to release then
            let _ = outbound.send(Outbound::Close).await;
        }

        let Some(mut pump) = self.pump.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.close_timeout, &mut pump).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Teardown(e.to_string())),
            Err(_) => {
                pump.abort();
                Err(TransportError::Teardown(format!(
                    "close handshake did not finish within {:?}",
                    self.close_timeout
                )))
            }
        }
    }
}

async fn pump(
    mut ws: WsStream,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws.send(Message::Text(text)).await {
                        warn!(error = %e, "Failed to send on telemetry WebSocket");
                        let _ = events.send(TransportEvent::Errored(e.to_string())).await;
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    close_socket(&mut ws).await;
                    return;
                }
            },

            frame = ws.next() => {
                let payload = match frame {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received WS ping, sending pong");
                        if let Err(e) = ws.send(Message::Pong(data)).await {
                            let _ = events.send(TransportEvent::Errored(e.to_string())).await;
                            return;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Telemetry WebSocket closed by peer");
                        // Flush the queued close reply to finish the handshake
                        if let Err(e) = ws.flush().await {
                            debug!(error = %e, "Close reply not sent");
                        }
                        let _ = events.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Errored(e.to_string())).await;
                        return;
                    }
                    None => {
                        let _ = events
                            .send(TransportEvent::Errored("connection dropped".to_string()))
                            .await;
                        return;
                    }
                };

                if events.send(TransportEvent::Message(payload)).await.is_err() {
                    debug!("Event receiver dropped, closing telemetry WebSocket");
                    close_socket(&mut ws).await;
                    return;
                }
            }
        }
    }
}

/// Send a close frame and wait for the peer to finish the handshake
async fn close_socket(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "Close frame not sent");
        return;
    }
    while let Some(Ok(_)) = ws.next().await {}
}

/// Builds a [`WebSocketTransport`] per session using the stream's timeouts
#[derive(Debug, Clone)]
pub struct WebSocketTransportFactory {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WebSocketTransportFactory {
    pub fn new(connect_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.connect_timeout(), config.close_timeout())
    }
}

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self, endpoint: &str) -> Box<dyn Transport> {
        Box::new(WebSocketTransport::new(
            endpoint,
            self.connect_timeout,
            self.close_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(endpoint: &str) -> WebSocketTransport {
        WebSocketTransport::new(endpoint, Duration::from_secs(1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let mut ws = transport("not a url");
        match ws.open().await {
            Err(TransportError::InvalidEndpoint(msg)) => assert!(msg.contains("not a url")),
            other => panic!("Expected InvalidEndpoint, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let mut ws = transport("ws://127.0.0.1:9/ws");
        assert!(matches!(
            ws.send("key".to_string()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_before_open_is_noop() {
        let mut ws = transport("ws://127.0.0.1:9/ws");
        assert!(ws.close().await.is_ok());
        assert!(ws.close().await.is_ok());
    }

    #[test]
    fn test_factory_uses_config_timeouts() {
        let config = StreamConfig {
            connect_timeout_secs: 3,
            close_timeout_secs: 7,
            ..StreamConfig::default()
        };
        let factory = WebSocketTransportFactory::from_config(&config);
        assert_eq!(factory.connect_timeout, Duration::from_secs(3));
        assert_eq!(factory.close_timeout, Duration::from_secs(7));
    }
}
