use serde::{Deserialize, Serialize};

use crate::{DataBatch, WireError};

/// What a remote device sends back while a request is active. A single
/// response may carry batches for several sensors of the same device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequestResponse {
    pub source_node_id: String,
    #[serde(default)]
    pub data_batches: Vec<DataBatch>,
}

impl DataRequestResponse {
    pub fn new(source_node_id: impl Into<String>) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            data_batches: vec![],
        }
    }

    pub fn with_batches(source_node_id: impl Into<String>, data_batches: Vec<DataBatch>) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            data_batches,
        }
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
