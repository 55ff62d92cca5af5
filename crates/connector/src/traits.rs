use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::error::{ResolverError, TransportError};

/// Socket activity, in the order it happened.
///
/// The session consumes these one at a time, which keeps message handling
/// serialized and lets tests drive a session without a real socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established; outbound messages may be sent
    Opened,
    /// One inbound frame (text or binary) as raw bytes
    Message(Vec<u8>),
    /// Transport failure; no further events follow
    Errored(String),
    /// Peer closed the connection; no further events follow
    Closed,
}

/// Transport trait for one connection attempt (WebSocket, test fakes).
/// Owned exclusively by a single session.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection and return the event stream.
    /// The first event on success is `TransportEvent::Opened`.
    async fn open(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Send one text message to the peer
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Release the socket. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Creates a fresh transport for every session
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &str) -> Box<dyn Transport>;
}

/// KeyResolver trait for credential sources (env vars, etc.)
pub trait KeyResolver: Send + Sync {
    /// Resolve keys from a source string (e.g., "env:VAR1,VAR2")
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError>;
}
