use chrono::{DateTime, Utc};
use serde::Serialize;

/// One decoded press sample.
///
/// Every field is populated; payloads missing a value never produce a record.
/// Serialized in camelCase so chart consumers can key series by field name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    /// Receiver wall clock at decode time (not device time)
    pub time: DateTime<Utc>,
    pub power: f64,
    #[serde(rename = "voltageL1")]
    pub voltage_l1: f64,
    #[serde(rename = "voltageL2")]
    pub voltage_l2: f64,
    #[serde(rename = "voltageL3")]
    pub voltage_l3: f64,
    pub pressure: f64,
    pub force: f64,
    pub cycle_count: f64,
    pub punch_position: f64,
}
