use serde::{Deserialize, Serialize};

use crate::{now_millis, SensorType, WireError};

/// Sentinel for a timestamp that has not been set yet. A request whose
/// end timestamp holds this value is still active.
pub const TIMESTAMP_NOT_SET: i64 = -1;

/// Ask a device to stream the listed sensor types to `source_node_id`
/// from `start_timestamp` until `end_timestamp` is set.
///
/// The only field mutated after creation is the end timestamp; a changed
/// sensor selection is expressed by replacing the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDataRequest {
    pub source_node_id: String,
    pub sensor_types: Vec<SensorType>,
    pub start_timestamp: i64,
    #[serde(default = "not_set")]
    pub end_timestamp: i64,
}

fn not_set() -> i64 {
    TIMESTAMP_NOT_SET
}

impl SensorDataRequest {
    /// Active request starting now
    pub fn new(source_node_id: impl Into<String>, sensor_types: Vec<SensorType>) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            sensor_types,
            start_timestamp: now_millis(),
            end_timestamp: TIMESTAMP_NOT_SET,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_timestamp == TIMESTAMP_NOT_SET
    }

    /// Mark the request as ended at `timestamp`
    pub fn stop_at(&mut self, timestamp: i64) {
        self.end_timestamp = timestamp;
    }

    pub fn stop(&mut self) {
        self.stop_at(now_millis());
    }

    pub fn requests_type(&self, sensor_type: SensorType) -> bool {
        self.sensor_types.contains(&sensor_type)
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_is_active() {
        let request = SensorDataRequest::new("hub", vec![21]);
        assert!(request.is_active());
        assert!(request.start_timestamp > 0);
        assert_eq!(request.end_timestamp, TIMESTAMP_NOT_SET);
    }

    #[test]
    fn sentinel_survives_the_wire() {
        let request = SensorDataRequest::new("hub", vec![1, 21]);
        let json = request.to_json().unwrap();
        assert!(json.contains("\"endTimestamp\":-1"));
        assert!(json.contains("\"sensorTypes\":[1,21]"));

        let decoded = SensorDataRequest::from_json(&json).unwrap();
        assert!(decoded.is_active());
        assert_eq!(decoded, request);
    }

    #[test]
    fn stopped_request_decodes_inactive() {
        let mut request = SensorDataRequest::new("hub", vec![5]);
        request.stop_at(1_700_000_000_000);

        let decoded = SensorDataRequest::from_slice(request.to_json().unwrap().as_bytes()).unwrap();
        assert!(!decoded.is_active());
        assert_eq!(decoded.end_timestamp, 1_700_000_000_000);
    }

    #[test]
    fn missing_end_timestamp_means_active() {
        let decoded = SensorDataRequest::from_json(
            r#"{"sourceNodeId":"hub","sensorTypes":[2],"startTimestamp":5}"#,
        )
        .unwrap();
        assert!(decoded.is_active());
        assert!(decoded.requests_type(2));
        assert!(!decoded.requests_type(3));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            SensorDataRequest::from_json("{not json"),
            Err(WireError::Json(_))
        ));
    }
}
