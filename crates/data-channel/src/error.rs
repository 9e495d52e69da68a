//! Error types for the channel transport.

use peerdrop_protocol::ProtocolError;

/// Errors produced by sub-channels and the transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("sub-channel `{0}` is not open")]
    NotOpen(String),

    #[error("send on `{label}` rejected: {reason}")]
    SendRejected { label: String, reason: String },

    #[error("encode error: {0}")]
    Encode(#[from] ProtocolError),
}
