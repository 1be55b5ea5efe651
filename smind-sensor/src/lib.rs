//! Sensor data model shared by the hub and remote sides of the
//! sensor-minder system.
//!
//! A hub device asks a remote device to stream a set of sensors by sending
//! it a [`SensorDataRequest`]. The remote answers with
//! [`DataRequestResponse`] messages, each carrying one [`DataBatch`] per
//! sensor. All of these types serialize to the JSON wire format that both
//! sides exchange over the transport:
//!
//! 1. requests: `{sourceNodeId, sensorTypes, startTimestamp, endTimestamp}`
//!    where an `endTimestamp` of [`TIMESTAMP_NOT_SET`] means the request is
//!    still active. Remote devices branch on this sentinel, so it must never
//!    be replaced by a separate flag.
//! 2. responses: `{sourceNodeId, dataBatches: [{source, data: [{timestamp,
//!    values}]}]}`

mod batch;
mod request;
mod response;
mod sensor;

pub use batch::{Capacity, DataBatch, SensorReading, DEFAULT_CAPACITY};
pub use request::{SensorDataRequest, TIMESTAMP_NOT_SET};
pub use response::DataRequestResponse;
pub use sensor::{DeviceSensor, SensorType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("JSON Error {0}")]
    Json(#[from] serde_json::Error),
}

/// Wall clock time in milliseconds since the unix epoch, used for
/// request start / end timestamps and reading timestamps
pub fn now_millis() -> i64 {
    chrono::Local::now().timestamp_millis()
}
