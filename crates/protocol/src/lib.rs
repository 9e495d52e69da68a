pub mod config;
pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;
pub mod room;
pub mod types;

// Re-export primary types for convenience.
pub use config::TransferConfig;
pub use constants::SignalType;
pub use envelope::Envelope;
pub use frame::ChunkFrame;
pub use messages::ControlMessage;
pub use room::RoomCode;
pub use types::{FileMeta, IceCandidate, PeerRole, SdpType, SessionDescription};

/// Errors produced while encoding or validating protocol data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too short: {0} bytes (need at least 4)")]
    FrameTooShort(usize),

    #[error("invalid room code: {0}")]
    InvalidRoomCode(String),

    #[error("invalid transfer config: {0}")]
    InvalidConfig(String),

    #[error("envelope `{signal}` is missing field `{field}`")]
    MissingField {
        signal: &'static str,
        field: &'static str,
    },
}
