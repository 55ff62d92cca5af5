//! One connection attempt to the telemetry gateway
//!
//! Phases: `Connecting -> Authenticating -> Streaming -> Closed`, with
//! `Errored` reachable from any non-terminal phase. Authentication is a single
//! outbound message carrying the API key; the session streams right after
//! sending it, without waiting for an acknowledgement.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::decoder::TelemetryDecoder;
use crate::error::{TransportError, ValidationError};
use crate::metrics::StreamMetrics;
use crate::rolling_buffer::RollingBuffer;
use crate::state::{ConnectionStatus, StatePublisher};
use crate::traits::{Transport, TransportEvent};

/// Rolling buffer shared between the controller (owner) and the active session (writer)
pub type SharedBuffer = Arc<Mutex<RollingBuffer>>;

/// Lock the shared buffer; a panicked writer cannot leave it half-updated
pub fn lock_buffer(buffer: &SharedBuffer) -> MutexGuard<'_, RollingBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticating,
    Streaming,
    Closed,
    Errored,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Closed | SessionPhase::Errored)
    }

    fn status(self) -> ConnectionStatus {
        match self {
            SessionPhase::Connecting | SessionPhase::Authenticating => ConnectionStatus::Connecting,
            SessionPhase::Streaming => ConnectionStatus::Streaming,
            SessionPhase::Closed => ConnectionStatus::Closed,
            SessionPhase::Errored => ConnectionStatus::Error,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Connecting => "connecting",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Closed => "closed",
            SessionPhase::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Wait until the shutdown flag is raised or its sender is dropped
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Receive the next event, failing if the peer stays silent for too long
async fn next_event(
    events: &mut mpsc::Receiver<TransportEvent>,
    idle_timeout: Option<Duration>,
) -> Result<Option<TransportEvent>, TransportError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, events.recv())
            .await
            .map_err(|_| TransportError::Timeout(limit)),
        None => Ok(events.recv().await),
    }
}

/// Everything a session borrows from its controller
#[derive(Clone)]
pub struct SessionContext {
    pub buffer: SharedBuffer,
    pub publisher: StatePublisher,
    pub metrics: StreamMetrics,
    pub shutdown: watch::Receiver<bool>,
    pub idle_timeout: Option<Duration>,
}

/// Owns one transport for its whole lifetime and feeds decoded records into
/// the controller's buffer
pub struct StreamSession {
    id: u64,
    credential: String,
    transport: Box<dyn Transport>,
    phase: SessionPhase,
    buffer: SharedBuffer,
    decoder: TelemetryDecoder,
    publisher: StatePublisher,
    metrics: StreamMetrics,
    shutdown: watch::Receiver<bool>,
    idle_timeout: Option<Duration>,
    reached_streaming: bool,
    last_error: Option<String>,
}

impl StreamSession {
    /// Create a session. Fails fast, before any connection attempt, when the
    /// credential is empty.
    pub fn new(
        id: u64,
        credential: &str,
        transport: Box<dyn Transport>,
        ctx: SessionContext,
    ) -> Result<Self, ValidationError> {
        if credential.trim().is_empty() {
            return Err(ValidationError::MissingCredential);
        }

        Ok(Self {
            id,
            credential: credential.to_string(),
            transport,
            phase: SessionPhase::Connecting,
            buffer: ctx.buffer,
            decoder: TelemetryDecoder::new(),
            publisher: ctx.publisher,
            metrics: ctx.metrics,
            shutdown: ctx.shutdown,
            idle_timeout: ctx.idle_timeout,
            reached_streaming: false,
            last_error: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether the session got as far as streaming before it ended
    pub fn reached_streaming(&self) -> bool {
        self.reached_streaming
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Drive the session until it closes or fails. Returns the terminal phase.
    pub async fn run(&mut self) -> SessionPhase {
        if self.phase.is_terminal() {
            return self.phase;
        }

        info!(session = self.id, "Opening telemetry session");
        self.publish_phase();

        let opened = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => None,
            result = self.transport.open() => Some(result),
        };

        let mut events = match opened {
            None => {
                self.close().await;
                return self.phase;
            }
            Some(Err(e)) => {
                self.fail(format!("failed to connect: {}", e));
                return self.phase;
            }
            Some(Ok(events)) => events,
        };

        while !self.phase.is_terminal() {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => None,
                event = next_event(&mut events, self.idle_timeout) => Some(event),
            };

            match next {
                None => self.enter(SessionPhase::Closed),
                Some(Ok(Some(event))) => self.handle_event(event).await,
                Some(Ok(None)) => self.fail("event stream ended without close".to_string()),
                Some(Err(e)) => self.fail(format!("no data received: {}", e)),
            }
        }

        // A full event channel would block the pump from seeing the close command
        drop(events);

        // Peer close and failures still hold a socket until released here
        self.release_socket().await;
        self.phase
    }

    /// Close the session and release its socket. No-op once terminal.
    pub async fn close(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.enter(SessionPhase::Closed);
        self.release_socket().await;
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened if self.phase == SessionPhase::Connecting => {
                self.authenticate().await;
            }
            TransportEvent::Opened => {
                warn!(session = self.id, phase = %self.phase, "Ignoring duplicate open event");
            }
            TransportEvent::Message(payload) => {
                self.metrics.inc_message();
                if self.phase == SessionPhase::Streaming {
                    self.ingest(&payload);
                } else {
                    warn!(
                        session = self.id,
                        phase = %self.phase,
                        "Ignoring message received before authentication"
                    );
                }
            }
            TransportEvent::Errored(cause) => self.fail(cause),
            TransportEvent::Closed => {
                info!(session = self.id, "Telemetry connection closed by peer");
                self.enter(SessionPhase::Closed);
            }
        }
    }

    async fn authenticate(&mut self) {
        self.enter(SessionPhase::Authenticating);

        if let Err(e) = self.transport.send(self.credential.clone()).await {
            self.fail(format!("failed to send credential: {}", e));
            return;
        }

        // No acknowledgement in the protocol: the key is accepted by sending it
        self.enter(SessionPhase::Streaming);
    }

    fn ingest(&mut self, payload: &[u8]) {
        let record = match self.decoder.decode(payload) {
            Ok(record) => record,
            Err(e) => {
                self.metrics.inc_decode_error(e.kind());
                warn!(session = self.id, error = %e, "Dropping undecodable telemetry message");
                return;
            }
        };

        if !self.is_live() {
            debug!(session = self.id, "Discarding record decoded after teardown");
            return;
        }

        trace!(session = self.id, cycle = record.cycle_count, "Appending telemetry record");
        let records = lock_buffer(&self.buffer).append(record).to_vec();

        self.metrics.inc_record();
        self.metrics.set_buffer_len(records.len());
        self.publisher.publish_records(records);
    }

    fn is_live(&self) -> bool {
        self.phase == SessionPhase::Streaming && !*self.shutdown.borrow()
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(session = self.id, from = %self.phase, to = %phase, "Session phase change");
        self.phase = phase;
        if phase == SessionPhase::Streaming {
            self.reached_streaming = true;
            info!(session = self.id, "Telemetry session streaming");
        }
        if phase.is_terminal() {
            self.metrics.inc_session(&phase.to_string());
        }
        self.publish_phase();
    }

    fn publish_phase(&self) {
        self.metrics
            .set_streaming(self.phase == SessionPhase::Streaming);
        if self.phase != SessionPhase::Errored {
            self.publisher.set_status(self.phase.status());
        }
    }

    fn fail(&mut self, message: String) {
        if self.phase.is_terminal() {
            return;
        }
        error!(session = self.id, phase = %self.phase, error = %message, "Telemetry session failed");
        self.last_error = Some(message.clone());
        self.publisher.set_failed(message);
        self.enter(SessionPhase::Errored);
    }

    async fn release_socket(&mut self) {
        if let Err(e) = self.transport.close().await {
            warn!(session = self.id, error = %e, "Failed to release telemetry socket cleanly");
        }
    }
}
