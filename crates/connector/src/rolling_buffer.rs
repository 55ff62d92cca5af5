//! Fixed-capacity sample history for charting
//!
//! Arrival order is chart order. When full, appending drops the oldest sample.
//! Single writer: the controller guards the buffer with a mutex and only the
//! active session appends.

use std::collections::vec_deque::{self, VecDeque};

use crate::record::TelemetryRecord;

/// Bounded FIFO history of telemetry records
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    records: VecDeque<TelemetryRecord>,
    capacity: usize,
}

impl RollingBuffer {
    /// Create an empty buffer. A capacity of 0 is promoted to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn append(&mut self, record: TelemetryRecord) -> Snapshot<'_> {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.snapshot()
    }

    /// Read-only view of the current history, oldest first
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            records: &self.records,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent record, if any
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }
}

/// Borrowed, ordered view over a [`RollingBuffer`]
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    records: &'a VecDeque<TelemetryRecord>,
}

impl<'a> Snapshot<'a> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'a, TelemetryRecord> {
        self.records.iter()
    }

    /// Owned copy for publishing to readers outside the lock
    pub fn to_vec(&self) -> Vec<TelemetryRecord> {
        self.records.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for Snapshot<'a> {
    type Item = &'a TelemetryRecord;
    type IntoIter = vec_deque::Iter<'a, TelemetryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(cycle: u32) -> TelemetryRecord {
        TelemetryRecord {
            time: Utc::now(),
            power: 100.0,
            voltage_l1: 230.0,
            voltage_l2: 230.0,
            voltage_l3: 230.0,
            pressure: 50.0,
            force: 40.0,
            cycle_count: cycle as f64,
            punch_position: 10.0,
        }
    }

    fn cycles(buffer: &RollingBuffer) -> Vec<f64> {
        buffer.snapshot().iter().map(|r| r.cycle_count).collect()
    }

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut buffer = RollingBuffer::new(5);
        buffer.append(record(1));
        buffer.append(record(2));
        let snapshot = buffer.append(record(3));

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.iter().next().unwrap().cycle_count, 1.0);
        assert_eq!(snapshot.iter().last().unwrap().cycle_count, 3.0);
        assert_eq!(cycles(&buffer), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_overflow_keeps_last_capacity_records() {
        let mut buffer = RollingBuffer::new(50);
        for cycle in 0..137 {
            buffer.append(record(cycle));
            assert!(buffer.len() <= 50);
        }

        assert_eq!(buffer.len(), 50);
        let expected: Vec<f64> = (87..137).map(|c| c as f64).collect();
        assert_eq!(cycles(&buffer), expected);
        assert_eq!(buffer.latest().unwrap().cycle_count, 136.0);
    }

    #[test]
    fn test_exactly_full_then_one_more() {
        let mut buffer = RollingBuffer::new(3);
        for cycle in 1..=3 {
            buffer.append(record(cycle));
        }
        assert_eq!(cycles(&buffer), vec![1.0, 2.0, 3.0]);

        let snapshot = buffer.append(record(4));
        assert_eq!(snapshot.len(), 3);
        assert_eq!(cycles(&buffer), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut buffer = RollingBuffer::new(4);
        let sample = record(7);
        buffer.append(sample.clone());
        buffer.append(sample.clone());
        assert_eq!(buffer.len(), 2);
        let kept: Vec<&TelemetryRecord> = buffer.snapshot().into_iter().collect();
        assert_eq!(kept[0], kept[1]);
    }

    #[test]
    fn test_zero_capacity_promoted_to_one() {
        let mut buffer = RollingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.append(record(1));
        buffer.append(record(2));
        assert_eq!(cycles(&buffer), vec![2.0]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RollingBuffer::new(3);
        buffer.append(record(1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.capacity(), 3);
    }

    #[test]
    fn test_to_vec_is_detached_copy() {
        let mut buffer = RollingBuffer::new(2);
        buffer.append(record(1));
        let shared = buffer.snapshot().to_vec();
        buffer.append(record(2));
        buffer.append(record(3));

        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].cycle_count, 1.0);
        assert_eq!(cycles(&buffer), vec![2.0, 3.0]);
    }
}
