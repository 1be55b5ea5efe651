use crate::{MessagePath, PeerId, UnknownPath};

/// Inbound or outbound transport message. The path is kept as the raw
/// string received from the transport so that unknown paths can be
/// reported by the [`crate::Dispatcher`] rather than lost in decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub path: String,
    pub payload: Vec<u8>,
    pub source_node_id: PeerId,
}

impl Message {
    pub fn new(path: MessagePath, payload: impl Into<Vec<u8>>, source: impl Into<PeerId>) -> Self {
        Self {
            path: path.as_str().to_string(),
            payload: payload.into(),
            source_node_id: source.into(),
        }
    }

    /// Message with an arbitrary path string, as a transport would hand it
    /// over before validation
    pub fn raw(
        path: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        source: impl Into<PeerId>,
    ) -> Self {
        Self {
            path: path.into(),
            payload: payload.into(),
            source_node_id: source.into(),
        }
    }

    pub fn message_path(&self) -> Result<MessagePath, UnknownPath> {
        self.path.parse()
    }

    pub fn source_node_id(&self) -> &PeerId {
        &self.source_node_id
    }

    /// Payload as utf8, replacing invalid sequences
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
