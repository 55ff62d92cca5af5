//! pressmon-metadata: Stream configuration shared by the connector crates

pub mod error;
pub mod stream;

pub use error::MetadataError;
pub use stream::{
    BufferConfig, ReconnectConfig, StreamConfig, DEFAULT_CAPACITY, DEFAULT_ENDPOINT,
    MAX_CAPACITY, MIN_CAPACITY,
};
