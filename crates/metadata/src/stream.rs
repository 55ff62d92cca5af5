use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::MetadataError;

/// Endpoint of the press telemetry gateway used when the config omits one
pub const DEFAULT_ENDPOINT: &str = "ws://technest.ddns.net:8001/ws";
/// Default number of samples kept for charting
pub const DEFAULT_CAPACITY: usize = 50;
/// Minimum allowed buffer capacity
pub const MIN_CAPACITY: usize = 1;
/// Maximum allowed buffer capacity
pub const MAX_CAPACITY: usize = 10_000;
/// Default timeout for opening the socket
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default timeout for releasing the socket on close
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;
/// Default consecutive reconnect attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay for reconnect backoff in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default upper bound for a single reconnect delay in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

fn default_name() -> String {
    "press".to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_reset_on_reconnect() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_close_timeout_secs() -> u64 {
    DEFAULT_CLOSE_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

/// Rolling history settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Start every new session from an empty history. When false, a new
    /// session keeps appending to the samples collected by the previous one.
    #[serde(default = "default_reset_on_reconnect")]
    pub reset_on_reconnect: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            reset_on_reconnect: default_reset_on_reconnect(),
        }
    }
}

/// Automatic reconnection after a transport failure. Disabled by default:
/// the operator reconnects by submitting the credential again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt N (0-based), doubling each attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms.saturating_mul(1 << attempt.min(6)); // cap at 64x
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Connection settings for one press telemetry stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Where to read the API key from, e.g. `env:PRESS_API_KEY`.
    /// The key itself is never stored in the config file.
    #[serde(default)]
    pub credential_source: Option<String>,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Treat the connection as dead after this many seconds without a frame
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            endpoint: default_endpoint(),
            credential_source: None,
            buffer: BufferConfig::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: None,
            close_timeout_secs: default_close_timeout_secs(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StreamConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a working stream
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::Validation("name must not be empty".to_string()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(MetadataError::Validation(format!(
                "endpoint must use ws:// or wss://, got: {}",
                self.endpoint
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp the buffer capacity into the supported range.
    /// Returns a tuple of (validated_config, was_clamped).
    pub fn validated(mut self) -> (Self, bool) {
        let mut clamped = false;
        if self.buffer.capacity < MIN_CAPACITY {
            self.buffer.capacity = MIN_CAPACITY;
            clamped = true;
        } else if self.buffer.capacity > MAX_CAPACITY {
            self.buffer.capacity = MAX_CAPACITY;
            clamped = true;
        }
        (self, clamped)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
