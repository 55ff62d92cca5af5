//! Consumer-facing dashboard state
//!
//! The presentation layer only ever reads [`DashboardState`] through a watch
//! channel; it is republished after every append and every status change.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::record::TelemetryRecord;

/// Connection status shown next to the charts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Error,
    Closed,
}

/// Everything a chart needs: ordered samples, status, and the last error
#[derive(Debug, Clone, Serialize, Default)]
pub struct DashboardState {
    pub status: ConnectionStatus,
    pub records: Vec<TelemetryRecord>,
    pub last_error: Option<String>,
}

/// Write side of the dashboard state channel
#[derive(Clone, Debug)]
pub struct StatePublisher {
    tx: Arc<watch::Sender<DashboardState>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DashboardState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> DashboardState {
        self.tx.borrow().clone()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.tx.send_modify(|state| {
            state.status = status;
            if status == ConnectionStatus::Streaming {
                state.last_error = None;
            }
        });
    }

    /// Mark the connection as failed with a reason
    pub fn set_failed(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| {
            state.status = ConnectionStatus::Error;
            state.last_error = Some(message);
        });
    }

    /// Record an error without changing the connection status
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|state| state.last_error = Some(message));
    }

    pub fn publish_records(&self, records: Vec<TelemetryRecord>) {
        self.tx.send_modify(|state| state.records = records);
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}
