//! Prometheus metrics for the telemetry connector
//!
//! Tracks inbound frames, decode outcomes, session lifecycle and buffer fill per stream.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec,
    TextEncoder,
};

/// Labels used for metrics
const LABEL_STREAM: &str = "stream";
const LABEL_KIND: &str = "kind";
const LABEL_OUTCOME: &str = "outcome";

/// Total frames received from the socket
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pressmon_messages_total",
        "Total frames received from the telemetry socket",
        &[LABEL_STREAM]
    )
    .expect("Failed to register messages_total metric")
});

/// Frames successfully decoded into records
static RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pressmon_records_total",
        "Total telemetry records appended to the rolling buffer",
        &[LABEL_STREAM]
    )
    .expect("Failed to register records_total metric")
});

/// Dropped frames by decode error kind
static DECODE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pressmon_decode_errors_total",
        "Frames dropped because they could not be decoded",
        &[LABEL_STREAM, LABEL_KIND]
    )
    .expect("Failed to register decode_errors_total metric")
});

/// Sessions by terminal outcome (closed, errored)
static SESSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pressmon_sessions_total",
        "Finished stream sessions by outcome",
        &[LABEL_STREAM, LABEL_OUTCOME]
    )
    .expect("Failed to register sessions_total metric")
});

/// Socket status (1 = streaming, 0 = not streaming)
static STREAMING: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pressmon_streaming",
        "Whether the telemetry socket is streaming (1) or not (0)",
        &[LABEL_STREAM]
    )
    .expect("Failed to register streaming metric")
});

/// Records currently held in the rolling buffer
static BUFFER_LEN: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pressmon_buffer_len",
        "Number of records in the rolling buffer",
        &[LABEL_STREAM]
    )
    .expect("Failed to register buffer_len metric")
});

/// Handle for recording metrics for one stream
#[derive(Clone, Debug)]
pub struct StreamMetrics {
    stream: String,
}

impl StreamMetrics {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
        }
    }

    pub fn inc_message(&self) {
        MESSAGES_TOTAL.with_label_values(&[&self.stream]).inc();
    }

    pub fn inc_record(&self) {
        RECORDS_TOTAL.with_label_values(&[&self.stream]).inc();
    }

    pub fn inc_decode_error(&self, kind: &str) {
        DECODE_ERRORS_TOTAL
            .with_label_values(&[&self.stream, kind])
            .inc();
    }

    pub fn inc_session(&self, outcome: &str) {
        SESSIONS_TOTAL
            .with_label_values(&[&self.stream, outcome])
            .inc();
    }

    pub fn set_streaming(&self, streaming: bool) {
        STREAMING
            .with_label_values(&[&self.stream])
            .set(i64::from(streaming));
    }

    pub fn set_buffer_len(&self, len: usize) {
        BUFFER_LEN
            .with_label_values(&[&self.stream])
            .set(len as i64);
    }

    pub fn decode_errors(&self, kind: &str) -> u64 {
        DECODE_ERRORS_TOTAL
            .with_label_values(&[&self.stream, kind])
            .get()
    }

    pub fn records(&self) -> u64 {
        RECORDS_TOTAL.with_label_values(&[&self.stream]).get()
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_metrics_counters() {
        let metrics = StreamMetrics::new("metrics-unit-test");
        metrics.inc_message();
        metrics.inc_record();
        metrics.inc_record();
        metrics.inc_decode_error("malformed");
        metrics.set_streaming(true);
        metrics.set_buffer_len(2);

        assert_eq!(metrics.records(), 2);
        assert_eq!(metrics.decode_errors("malformed"), 1);
        assert_eq!(metrics.decode_errors("type_mismatch"), 0);
    }

    #[test]
    fn test_encode_metrics() {
        StreamMetrics::new("metrics-encode-test").inc_session("closed");
        let output = encode_metrics().unwrap();
        assert!(output.contains("pressmon_sessions_total"));
    }
}
