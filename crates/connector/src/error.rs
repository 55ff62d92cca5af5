use std::time::Duration;
use thiserror::Error;

/// Rejected before any connection attempt is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing credential: an API key is required to connect")]
    MissingCredential,
}

/// Per-message failure; the message is dropped and streaming continues
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("field is not numeric: {0}")]
    TypeMismatch(&'static str),
}

impl DecodeError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::TypeMismatch(_) => "type_mismatch",
        }
    }
}

/// Connection-level failure; terminates the current session only
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("failed to release socket: {0}")]
    Teardown(String),
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}
