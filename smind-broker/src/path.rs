use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown message path {0}")]
pub struct UnknownPath(pub String);

/// Fixed vocabulary of message paths spoken between hub and remote
/// devices. Each path's payload shape is owned by whichever handler
/// consumes it; the path itself only selects the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagePath {
    /// Ask peers for their status, empty payload
    GetStatus,
    /// Status report, opaque string payload
    SetStatus,
    /// Serialized [`smind_sensor::SensorDataRequest`]
    SensorDataRequest,
    /// Serialized [`smind_sensor::DataRequestResponse`]
    SensorDataRequestResponse,
    /// Best effort notice that the sender is going away, payload is a
    /// human readable device label
    Closing,
}

impl MessagePath {
    pub const ALL: [MessagePath; 5] = [
        MessagePath::GetStatus,
        MessagePath::SetStatus,
        MessagePath::SensorDataRequest,
        MessagePath::SensorDataRequestResponse,
        MessagePath::Closing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePath::GetStatus => "/get_status",
            MessagePath::SetStatus => "/set_status",
            MessagePath::SensorDataRequest => "/sensor_data_request",
            MessagePath::SensorDataRequestResponse => "/sensor_data_request_response",
            MessagePath::Closing => "/closing",
        }
    }
}

impl fmt::Display for MessagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessagePath {
    type Err = UnknownPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessagePath::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownPath(s.to_string()))
    }
}
