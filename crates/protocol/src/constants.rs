use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed delay between relay reconnection attempts.
pub const RELAY_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Maximum relay reconnection attempts before the link is reported Disconnected.
pub const RELAY_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// WebSocket close code for a normal (intentional) closure; suppresses reconnect.
pub const RELAY_CLOSE_NORMAL: u16 = 1000;

/// How often WebSocket-level pings are sent on the relay link.
pub const RELAY_PING_PERIOD: Duration = Duration::from_secs(15);

/// Maximum signaling message size accepted from the relay (1 MB).
pub const RELAY_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the control sub-channel sends a `ping`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on a single drain wait when the low-water event never fires.
pub const DRAIN_FALLBACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Default payload bytes per data frame (250 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 250 * 1024;

/// Default buffered-amount ceiling checked before each send (4 MiB).
pub const DEFAULT_HIGH_WATER_MARK: usize = 4 * 1024 * 1024;

/// Default buffered-amount-low threshold on the data sub-channel (1 MiB).
pub const DEFAULT_LOW_WATER_MARK: usize = 1024 * 1024;

/// Largest chunk size a config may request (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// The receiver emits an `ack` every this many chunks.
pub const ACK_EVERY_CHUNKS: u32 = 40;

/// Minimum interval between throughput samples.
pub const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Pause before the next queued file's `file-request` is sent.
pub const QUEUE_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Size of the chunk index prefix on every data frame.
pub const FRAME_INDEX_LEN: usize = 4;

/// Sub-channel label for control messages.
pub const CONTROL_CHANNEL_LABEL: &str = "control";

/// Sub-channel label for binary chunk frames.
pub const DATA_CHANNEL_LABEL: &str = "data";

/// Signaling envelope type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    // Client -> relay
    #[serde(rename = "join")]
    Join,

    // Relay -> client
    #[serde(rename = "joined")]
    Joined,
    #[serde(rename = "room-state")]
    RoomState,
    #[serde(rename = "peer-joined")]
    PeerJoined,
    #[serde(rename = "peer-left")]
    PeerLeft,
    #[serde(rename = "error")]
    Error,

    // Forwarded verbatim between peers
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,

    /// Forward compatibility: unknown envelope types deserialize here.
    #[serde(other)]
    Unknown,
}

impl SignalType {
    /// Wire name of the envelope type.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Join => "join",
            SignalType::Joined => "joined",
            SignalType::RoomState => "room-state",
            SignalType::PeerJoined => "peer-joined",
            SignalType::PeerLeft => "peer-left",
            SignalType::Error => "error",
            SignalType::Offer => "offer",
            SignalType::Answer => "answer",
            SignalType::IceCandidate => "ice-candidate",
            SignalType::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_serialization() {
        assert_eq!(
            serde_json::to_string(&SignalType::PeerJoined).unwrap(),
            "\"peer-joined\""
        );
        assert_eq!(
            serde_json::to_string(&SignalType::IceCandidate).unwrap(),
            "\"ice-candidate\""
        );
        assert_eq!(
            serde_json::to_string(&SignalType::RoomState).unwrap(),
            "\"room-state\""
        );
    }

    #[test]
    fn signal_type_deserialization() {
        let st: SignalType = serde_json::from_str("\"answer\"").unwrap();
        assert_eq!(st, SignalType::Answer);
    }

    #[test]
    fn unknown_signal_type() {
        let st: SignalType = serde_json::from_str("\"renegotiate\"").unwrap();
        assert_eq!(st, SignalType::Unknown);
    }

    #[test]
    fn as_str_matches_serde_name() {
        for st in [
            SignalType::Join,
            SignalType::Joined,
            SignalType::RoomState,
            SignalType::PeerJoined,
            SignalType::PeerLeft,
            SignalType::Error,
            SignalType::Offer,
            SignalType::Answer,
            SignalType::IceCandidate,
        ] {
            let json = serde_json::to_string(&st).unwrap();
            assert_eq!(json, format!("\"{}\"", st.as_str()));
        }
    }

    #[test]
    fn water_marks_are_ordered() {
        assert!(DEFAULT_LOW_WATER_MARK < DEFAULT_HIGH_WATER_MARK);
        assert!(DEFAULT_CHUNK_SIZE < DEFAULT_HIGH_WATER_MARK);
    }
}
