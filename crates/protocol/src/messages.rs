use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::types::FileMeta;

/// Messages carried as JSON text on the control sub-channel.
///
/// Delivered in send order. Unknown `type` tags fail to parse; the
/// transport logs and drops them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Sender proposes a file.
    #[serde(rename_all = "camelCase")]
    FileRequest {
        name: String,
        size: u64,
        #[serde(default = "crate::types::default_mime_type")]
        mime_type: String,
    },
    FileAccept,
    FileReject,
    /// Receiver progress, sent every few chunks.
    #[serde(rename_all = "camelCase")]
    Ack {
        chunk_index: u32,
        bytes_received: u64,
    },
    Ping,
    Pong,
    /// Receiver has reassembled the whole file.
    #[serde(rename_all = "camelCase")]
    FileComplete { bytes_received: u64 },
    Cancel,
}

impl ControlMessage {
    pub fn file_request(meta: &FileMeta) -> Self {
        ControlMessage::FileRequest {
            name: meta.name.clone(),
            size: meta.size,
            mime_type: meta.mime_type.clone(),
        }
    }

    /// Metadata of a `file-request`, `None` for any other message.
    pub fn file_meta(&self) -> Option<FileMeta> {
        match self {
            ControlMessage::FileRequest {
                name,
                size,
                mime_type,
            } => Some(FileMeta::new(name.clone(), *size, mime_type.clone())),
            _ => None,
        }
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::FileRequest { .. } => "file-request",
            ControlMessage::FileAccept => "file-accept",
            ControlMessage::FileReject => "file-reject",
            ControlMessage::Ack { .. } => "ack",
            ControlMessage::Ping => "ping",
            ControlMessage::Pong => "pong",
            ControlMessage::FileComplete { .. } => "file-complete",
            ControlMessage::Cancel => "cancel",
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
