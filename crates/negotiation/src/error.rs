use thiserror::Error;

use peerdrop_protocol::ProtocolError;

use crate::types::NegotiationState;

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("webrtc: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no peer connection")]
    NoPeer,

    #[error("no room joined for {0}")]
    NoRoom(&'static str),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("{signal} not valid in state {state:?}")]
    InvalidTransition {
        signal: &'static str,
        state: NegotiationState,
    },
}
