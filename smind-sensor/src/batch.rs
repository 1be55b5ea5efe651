use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of readings a bounded batch keeps before dropping the
/// oldest ones
pub const DEFAULT_CAPACITY: usize = 100;

/// Single timestamped reading, one value per sensor axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: i64,
    pub values: Vec<f64>,
}

impl SensorReading {
    pub fn new(timestamp: i64, values: Vec<f64>) -> Self {
        Self { timestamp, values }
    }
}

/// How many readings a [`DataBatch`] may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capacity {
    /// Drop the oldest reading once the limit is exceeded
    Bounded(usize),
    #[default]
    Unlimited,
}

/// Ordered readings from a single sensor. The `source` is fixed at
/// creation; readings are kept in arrival order.
///
/// The capacity is local state and never goes over the wire, so a batch
/// decoded from a response is [`Capacity::Unlimited`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    source: String,
    #[serde(rename = "data", default)]
    readings: VecDeque<SensorReading>,
    #[serde(skip)]
    capacity: Capacity,
}

impl DataBatch {
    /// New batch bounded to [`DEFAULT_CAPACITY`] readings
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_capacity(source, Capacity::Bounded(DEFAULT_CAPACITY))
    }

    pub fn unlimited(source: impl Into<String>) -> Self {
        Self::with_capacity(source, Capacity::Unlimited)
    }

    pub fn with_capacity(source: impl Into<String>, capacity: Capacity) -> Self {
        Self {
            source: source.into(),
            readings: VecDeque::new(),
            capacity,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    /// Change the capacity, trimming the oldest readings if the new bound
    /// is lower than the current length
    pub fn set_capacity(&mut self, capacity: Capacity) {
        self.capacity = capacity;
        self.trim();
    }

    pub fn add_reading(&mut self, reading: SensorReading) {
        self.readings.push_back(reading);
        self.trim();
    }

    pub fn add_readings<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = SensorReading>,
    {
        self.readings.extend(readings);
        self.trim();
    }

    /// Append all readings of `other`, keeping their order. The source
    /// of `other` is not checked; callers key batches by source.
    pub fn merge(&mut self, other: DataBatch) {
        self.add_readings(other.readings);
    }

    pub fn readings(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    /// Readings with a timestamp at or after `timestamp`
    pub fn readings_since(&self, timestamp: i64) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter().filter(move |r| r.timestamp >= timestamp)
    }

    pub fn newest(&self) -> Option<&SensorReading> {
        self.readings.back()
    }

    pub fn oldest(&self) -> Option<&SensorReading> {
        self.readings.front()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Remove and return every reading, leaving the batch empty
    pub fn drain(&mut self) -> Vec<SensorReading> {
        self.readings.drain(..).collect()
    }

    fn trim(&mut self) {
        if let Capacity::Bounded(max) = self.capacity {
            while self.readings.len() > max {
                self.readings.pop_front();
            }
        }
    }
}
