//! Binary framing for the data sub-channel.
//!
//! Every frame is a 4-byte little-endian chunk index followed by the chunk
//! payload. The index is a cross-check for ordering, never a reordering key.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtocolError;
use crate::constants::FRAME_INDEX_LEN;

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    pub index: u32,
    pub payload: Bytes,
}

impl ChunkFrame {
    pub fn new(index: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    /// Serializes the frame as index prefix + payload.
    pub fn encode(&self) -> Bytes {
        encode(self.index, &self.payload)
    }

    /// Splits a received frame. The payload shares the input buffer.
    pub fn decode(frame: Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < FRAME_INDEX_LEN {
            return Err(ProtocolError::FrameTooShort(frame.len()));
        }
        let mut prefix = [0u8; FRAME_INDEX_LEN];
        prefix.copy_from_slice(&frame[..FRAME_INDEX_LEN]);
        Ok(Self {
            index: u32::from_le_bytes(prefix),
            payload: frame.slice(FRAME_INDEX_LEN..),
        })
    }

    /// Total size on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_INDEX_LEN + self.payload.len()
    }
}

/// Builds a frame directly from a payload slice.
pub fn encode(index: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_INDEX_LEN + payload.len());
    buf.put_u32_le(index);
    buf.put_slice(payload);
    buf.freeze()
}
