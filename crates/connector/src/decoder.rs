//! Press telemetry payload decoding
//!
//! The gateway sends one JSON object per frame with nested sections, e.g.
//! `{"Energy Consumption":{"Power":10},"Voltage":{"L1-GND":231,...},"Force":6,...}`.
//! There is no message type tag, so every frame is expected to carry all eight values.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::record::TelemetryRecord;

/// JSON path of each value, keyed by the record field it fills.
/// Order matters: the first failing entry is the one reported.
pub const FIELD_PATHS: [(&str, &[&str]); 8] = [
    ("power", &["Energy Consumption", "Power"]),
    ("voltageL1", &["Voltage", "L1-GND"]),
    ("voltageL2", &["Voltage", "L2-GND"]),
    ("voltageL3", &["Voltage", "L3-GND"]),
    ("pressure", &["Pressure"]),
    ("force", &["Force"]),
    ("cycleCount", &["Cycle Count"]),
    ("punchPosition", &["Position of the Punch"]),
];

/// Maps raw frames into [`TelemetryRecord`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryDecoder;

impl TelemetryDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a frame, stamping it with the current wall clock
    pub fn decode(&self, raw: &[u8]) -> Result<TelemetryRecord, DecodeError> {
        self.decode_at(raw, Utc::now())
    }

    /// Decode a frame with an explicit receive time
    pub fn decode_at(
        &self,
        raw: &[u8],
        time: DateTime<Utc>,
    ) -> Result<TelemetryRecord, DecodeError> {
        let root: Value =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let root = root.as_object().ok_or_else(|| {
            DecodeError::Malformed(format!("expected a JSON object, got {}", json_kind(&root)))
        })?;

        let mut values = [0.0_f64; 8];
        for (slot, &(field, path)) in values.iter_mut().zip(FIELD_PATHS.iter()) {
            *slot = extract(root, field, path)?;
        }
        let [power, voltage_l1, voltage_l2, voltage_l3, pressure, force, cycle_count, punch_position] =
            values;

        Ok(TelemetryRecord {
            time,
            power,
            voltage_l1,
            voltage_l2,
            voltage_l3,
            pressure,
            force,
            cycle_count,
            punch_position,
        })
    }
}

fn extract(
    root: &Map<String, Value>,
    field: &'static str,
    path: &[&str],
) -> Result<f64, DecodeError> {
    let (leaf, parents) = path
        .split_last()
        .ok_or(DecodeError::MissingField(field))?;

    let mut node = root;
    for key in parents {
        node = node
            .get(*key)
            .and_then(Value::as_object)
            .ok_or(DecodeError::MissingField(field))?;
    }

    node.get(*leaf)
        .ok_or(DecodeError::MissingField(field))?
        .as_f64()
        .ok_or(DecodeError::TypeMismatch(field))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "Energy Consumption": {"Power": 152.4},
            "Voltage": {"L1-GND": 231.1, "L2-GND": 229.8, "L3-GND": 230.5},
            "Pressure": 61.2,
            "Force": 48.0,
            "Cycle Count": 9731,
            "Position of the Punch": 112.5
        })
    }

    fn decode_value(value: &Value) -> Result<TelemetryRecord, DecodeError> {
        TelemetryDecoder::new().decode(value.to_string().as_bytes())
    }

    #[test]
    fn test_decode_full_payload() {
        let before = Utc::now();
        let record = decode_value(&sample()).unwrap();

        assert_eq!(record.power, 152.4);
        assert_eq!(record.voltage_l1, 231.1);
        assert_eq!(record.voltage_l2, 229.8);
        assert_eq!(record.voltage_l3, 230.5);
        assert_eq!(record.pressure, 61.2);
        assert_eq!(record.force, 48.0);
        assert_eq!(record.cycle_count, 9731.0);
        assert_eq!(record.punch_position, 112.5);
        assert!(record.time >= before);
    }

    #[test]
    fn test_decode_at_uses_given_time() {
        let time = DateTime::parse_from_rfc3339("2024-05-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = TelemetryDecoder::new()
            .decode_at(sample().to_string().as_bytes(), time)
            .unwrap();
        assert_eq!(record.time, time);
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let mut payload = sample();
        payload["Temperature"] = json!(40.5);
        payload["Voltage"]["L1-L2"] = json!(400.0);
        assert!(decode_value(&payload).is_ok());
    }

    #[test]
    fn test_missing_force() {
        let mut payload = sample();
        payload.as_object_mut().unwrap().remove("Force");
        assert_eq!(decode_value(&payload), Err(DecodeError::MissingField("force")));
    }

    #[test]
    fn test_missing_nested_section() {
        let mut payload = sample();
        payload.as_object_mut().unwrap().remove("Energy Consumption");
        assert_eq!(decode_value(&payload), Err(DecodeError::MissingField("power")));
    }

    #[test]
    fn test_missing_nested_leaf() {
        let mut payload = sample();
        payload["Voltage"].as_object_mut().unwrap().remove("L2-GND");
        assert_eq!(decode_value(&payload), Err(DecodeError::MissingField("voltageL2")));
    }

    #[test]
    fn test_section_that_is_not_an_object() {
        let mut payload = sample();
        payload["Voltage"] = json!(230);
        assert_eq!(decode_value(&payload), Err(DecodeError::MissingField("voltageL1")));
    }

    #[test]
    fn test_string_value_is_type_mismatch() {
        let mut payload = sample();
        payload["Cycle Count"] = json!("9731");
        assert_eq!(decode_value(&payload), Err(DecodeError::TypeMismatch("cycleCount")));
    }

    #[test]
    fn test_null_value_is_type_mismatch() {
        let mut payload = sample();
        payload["Position of the Punch"] = Value::Null;
        assert_eq!(
            decode_value(&payload),
            Err(DecodeError::TypeMismatch("punchPosition"))
        );
    }

    #[test]
    fn test_first_failure_in_field_order_wins() {
        let mut payload = sample();
        payload["Pressure"] = json!(true);
        payload.as_object_mut().unwrap().remove("Force");
        assert_eq!(decode_value(&payload), Err(DecodeError::TypeMismatch("pressure")));
    }

    #[test]
    fn test_malformed_payloads() {
        let decoder = TelemetryDecoder::new();
        for raw in [&b"not json"[..], &b"{\"Force\": "[..], &b""[..], &b"\xff\xfe"[..]] {
            assert!(
                matches!(decoder.decode(raw), Err(DecodeError::Malformed(_))),
                "expected Malformed for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_non_object_root_is_malformed() {
        match TelemetryDecoder::new().decode(b"[1, 2, 3]") {
            Err(DecodeError::Malformed(msg)) => assert!(msg.contains("array")),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }
}
