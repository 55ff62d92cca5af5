//! pressmon-connector: Press telemetry ingestion runtime components
//!
//! This crate connects to a press telemetry gateway over WebSocket, decodes
//! each sample and keeps a bounded history ready for charting.

pub mod controller;
pub mod decoder;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod record;
pub mod resolver;
pub mod rolling_buffer;
pub mod server;
pub mod session;
pub mod state;
pub mod traits;
pub mod websocket;

pub use controller::ConnectionController;
pub use decoder::TelemetryDecoder;
pub use error::{DecodeError, ResolverError, TransportError, ValidationError};
pub use record::TelemetryRecord;
pub use resolver::EnvResolver;
pub use rolling_buffer::{RollingBuffer, Snapshot};
pub use server::{create_router, run_server, ServerState};
pub use session::{SessionPhase, StreamSession};
pub use state::{ConnectionStatus, DashboardState, StatePublisher};
pub use traits::{KeyResolver, Transport, TransportEvent, TransportFactory};
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};
