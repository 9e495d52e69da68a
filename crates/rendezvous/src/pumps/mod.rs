//! Per-link tasks: one reader, one writer, one keepalive.
//!
//! The pumps share the close-frame helpers below so that the code the
//! writer sends and the code the reader treats as final stay the same.

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use peerdrop_protocol::constants::RELAY_CLOSE_NORMAL;

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;

/// Close frame ending a link on purpose. The relay mirrors the code back.
pub(crate) fn leaving() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(RELAY_CLOSE_NORMAL),
        reason: "leaving".to_string().into(),
    }))
}

/// Whether a received close frame ends the link for good.
pub(crate) fn is_final(frame: Option<&CloseFrame>) -> bool {
    frame.is_some_and(|f| u16::from(f.code) == RELAY_CLOSE_NORMAL)
}

/// Keepalive payload: the ping's sequence number, big-endian.
pub(crate) fn ping_payload(seq: u64) -> Message {
    Message::Ping(seq.to_be_bytes().to_vec().into())
}

/// Sequence number echoed in a pong, if it carries one.
pub(crate) fn pong_seq(data: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = data.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
