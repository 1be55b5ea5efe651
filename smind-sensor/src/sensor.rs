use serde::{Deserialize, Serialize};

/// Integer sensor type identifier as carried in the `sensorTypes`
/// array of a [`crate::SensorDataRequest`]
pub type SensorType = i32;

/// A sensor available on some device. Requests carry the integer
/// type on the wire, while data batches are labelled with the sensor
/// name, so the hub keeps both around for a selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSensor {
    pub sensor_type: SensorType,
    pub name: String,
}

impl DeviceSensor {
    // Well known type ids, matching the numbering used by the
    // remote devices' sensor framework
    pub const ACCELEROMETER: SensorType = 1;
    pub const MAGNETIC_FIELD: SensorType = 2;
    pub const GYROSCOPE: SensorType = 4;
    pub const LIGHT: SensorType = 5;
    pub const PRESSURE: SensorType = 6;
    pub const PROXIMITY: SensorType = 8;
    pub const HEART_RATE: SensorType = 21;

    pub fn new(sensor_type: SensorType, name: impl Into<String>) -> Self {
        Self {
            sensor_type,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeviceSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.sensor_type)
    }
}
