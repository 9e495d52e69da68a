use peerdrop_protocol::ProtocolError;
use peerdrop_transfer::TransferError;

/// Errors produced by the session crate.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("already in room {0}")]
    AlreadyInRoom(String),

    #[error("no peer connection")]
    NotConnected,

    #[error("session stopped")]
    Stopped,
}
