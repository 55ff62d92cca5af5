//! In-memory transport for testing
//!
//! Each created transport gets an [`InMemoryPeer`] playing the gateway side:
//! push events into the session and inspect what the client sent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use crate::error::TransportError;
use crate::traits::{Transport, TransportEvent, TransportFactory};

const CHANNEL_BUFFER_SIZE: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How an in-memory transport reacts to `open()`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// Connect and immediately emit `Opened`
    #[default]
    Accept,
    /// Connect but never emit `Opened`; the peer decides when
    Defer,
    /// Fail with a connection error
    Refuse(String),
}

#[derive(Debug)]
struct PeerState {
    endpoint: String,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    received: Mutex<Vec<String>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

/// Gateway side of one in-memory connection
#[derive(Debug, Clone)]
pub struct InMemoryPeer {
    state: Arc<PeerState>,
}

impl InMemoryPeer {
    fn new(endpoint: &str) -> Self {
        Self {
            state: Arc::new(PeerState {
                endpoint: endpoint.to_string(),
                events: Mutex::new(None),
                received: Mutex::new(Vec::new()),
                opened: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.state.endpoint
    }

    /// Deliver an event to the session. Returns false once the client side is gone.
    pub async fn push(&self, event: TransportEvent) -> bool {
        let sender = lock(&self.state.events).clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver one text frame
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(TransportEvent::Message(text.into().into_bytes()))
            .await
    }

    /// Text messages the client sent, in order
    pub fn received(&self) -> Vec<String> {
        lock(&self.state.received).clone()
    }

    pub fn is_opened(&self) -> bool {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Whether the client released the connection
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

/// Client side of one in-memory connection
pub struct InMemoryTransport {
    peer: InMemoryPeer,
    behavior: OpenBehavior,
}

impl InMemoryTransport {
    pub fn new(endpoint: &str, behavior: OpenBehavior) -> (Self, InMemoryPeer) {
        let peer = InMemoryPeer::new(endpoint);
        (
            Self {
                peer: peer.clone(),
                behavior,
            },
            peer,
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if let OpenBehavior::Refuse(reason) = &self.behavior {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        if self.behavior == OpenBehavior::Accept {
            tx.send(TransportEvent::Opened)
                .await
                .map_err(|_| TransportError::Closed)?;
        }
        *lock(&self.peer.state.events) = Some(tx);
        self.peer.state.opened.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.peer.is_closed() || !self.peer.is_opened() {
            return Err(TransportError::Closed);
        }
        lock(&self.peer.state.received).push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        lock(&self.peer.state.events).take();
        self.peer.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out in-memory transports and keeps their peers for inspection
#[derive(Debug, Default)]
pub struct InMemoryTransportFactory {
    peers: Mutex<Vec<InMemoryPeer>>,
    behaviors: Mutex<VecDeque<OpenBehavior>>,
    created: Notify,
}

impl InMemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior of the next created transport (default: `Accept`)
    pub fn push_behavior(&self, behavior: OpenBehavior) {
        lock(&self.behaviors).push_back(behavior);
    }

    /// Number of transports created so far, i.e. connection attempts
    pub fn connection_attempts(&self) -> usize {
        lock(&self.peers).len()
    }

    /// Wait until the transport with the given index has been created and opened
    pub async fn wait_for_peer(&self, index: usize, timeout: Duration) -> Option<InMemoryPeer> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.created.notified();
                let found = lock(&self.peers)
                    .get(index)
                    .filter(|p| p.is_opened())
                    .cloned();
                if let Some(peer) = found {
                    return peer;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
        })
        .await
        .ok()
    }
}

impl TransportFactory for InMemoryTransportFactory {
    fn create(&self, endpoint: &str) -> Box<dyn Transport> {
        let behavior = lock(&self.behaviors).pop_front().unwrap_or_default();
        let (transport, peer) = InMemoryTransport::new(endpoint, behavior);
        lock(&self.peers).push(peer);
        self.created.notify_waiters();
        Box::new(transport)
    }
}
