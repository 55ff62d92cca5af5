//! Dashboard-facing orchestration of stream sessions
//!
//! The controller owns the rolling buffer and at most one supervisor task.
//! The supervisor runs sessions back to back: one session normally, more when
//! reconnect is enabled and a session fails.

use pressmon_metadata::{ReconnectConfig, StreamConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::ValidationError;
use crate::metrics::StreamMetrics;
use crate::record::TelemetryRecord;
use crate::rolling_buffer::RollingBuffer;
use crate::session::{
    lock_buffer, shutdown_requested, SessionContext, SessionPhase, SharedBuffer, StreamSession,
};
use crate::state::{ConnectionStatus, DashboardState, StatePublisher};
use crate::traits::TransportFactory;

struct ActiveStream {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Starts, replaces and stops telemetry sessions for one dashboard
pub struct ConnectionController {
    config: StreamConfig,
    factory: Arc<dyn TransportFactory>,
    buffer: SharedBuffer,
    publisher: StatePublisher,
    metrics: StreamMetrics,
    session_ids: Arc<AtomicU64>,
    active: Option<ActiveStream>,
}

impl ConnectionController {
    pub fn new(config: StreamConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let buffer = Arc::new(Mutex::new(RollingBuffer::new(config.buffer.capacity)));
        let metrics = StreamMetrics::new(&config.name);
        Self {
            config,
            factory,
            buffer,
            publisher: StatePublisher::new(),
            metrics,
            session_ids: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Start streaming with the given API key.
    ///
    /// A rejected credential leaves any running session untouched. Otherwise the
    /// current session is closed and joined before the new one is spawned.
    pub async fn start(&mut self, credential: &str) -> Result<(), ValidationError> {
        if credential.trim().is_empty() {
            let err = ValidationError::MissingCredential;
            warn!(stream = %self.config.name, "Refusing to start: {}", err);
            self.publisher.set_error(err.to_string());
            return Err(err);
        }

        self.stop().await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor {
            credential: credential.to_string(),
            endpoint: self.config.endpoint.clone(),
            reset_on_reconnect: self.config.buffer.reset_on_reconnect,
            reconnect: self.config.reconnect.clone(),
            factory: Arc::clone(&self.factory),
            session_ids: Arc::clone(&self.session_ids),
            ctx: SessionContext {
                buffer: Arc::clone(&self.buffer),
                publisher: self.publisher.clone(),
                metrics: self.metrics.clone(),
                shutdown: shutdown_rx,
                idle_timeout: self.config.idle_timeout(),
            },
        };

        info!(stream = %self.config.name, endpoint = %self.config.endpoint, "Starting telemetry stream");
        let handle = tokio::spawn(supervisor.run());
        self.active = Some(ActiveStream { shutdown, handle });
        Ok(())
    }

    /// Close the active session, if any, and wait for it to finish
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        // A finished supervisor already published its final status
        let was_running = !active.handle.is_finished();

        // Receiver gone means the supervisor already finished
        let _ = active.shutdown.send(true);
        if let Err(e) = active.handle.await {
            error!(stream = %self.config.name, error = %e, "Stream supervisor task failed");
        }

        self.metrics.set_streaming(false);
        if was_running {
            self.publisher.set_status(ConnectionStatus::Closed);
        }
        info!(stream = %self.config.name, "Telemetry stream stopped");
    }

    /// Live view of the dashboard state
    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> DashboardState {
        self.publisher.current()
    }

    /// Copy of the buffered records, oldest first
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        lock_buffer(&self.buffer).snapshot().to_vec()
    }

    /// Whether a supervisor task is still running sessions
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(true);
        }
    }
}

/// Runs sessions for one `start` until shutdown, a clean close, or the
/// reconnect budget is spent
struct Supervisor {
    credential: String,
    endpoint: String,
    reset_on_reconnect: bool,
    reconnect: ReconnectConfig,
    factory: Arc<dyn TransportFactory>,
    session_ids: Arc<AtomicU64>,
    ctx: SessionContext,
}

impl Supervisor {
    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            if self.reset_on_reconnect {
                lock_buffer(&self.ctx.buffer).clear();
                self.ctx.metrics.set_buffer_len(0);
                self.ctx.publisher.publish_records(Vec::new());
            }

            let id = self.session_ids.fetch_add(1, Ordering::SeqCst) + 1;
            let transport = self.factory.create(&self.endpoint);
            let mut session =
                match StreamSession::new(id, &self.credential, transport, self.ctx.clone()) {
                    Ok(session) => session,
                    Err(e) => {
                        self.ctx.publisher.set_error(e.to_string());
                        return;
                    }
                };

            let phase = session.run().await;
            if phase != SessionPhase::Errored
                || !self.reconnect.enabled
                || *self.ctx.shutdown.borrow()
            {
                return;
            }

            if session.reached_streaming() {
                failures = 0;
            }
            failures += 1;
            if failures >= self.reconnect.max_attempts {
                warn!(
                    session = id,
                    failures,
                    "Giving up on telemetry stream after repeated failures"
                );
                return;
            }

            let delay = self.reconnect.delay_for(failures - 1);
            info!(session = id, failures, delay_ms = delay.as_millis() as u64, "Reconnecting telemetry stream");

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.ctx.shutdown) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
