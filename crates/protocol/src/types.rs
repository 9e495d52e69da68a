use serde::{Deserialize, Serialize};

/// Role assigned by the relay when joining a room.
///
/// The first member of a room is the [`PeerRole::Initiator`]: it creates
/// both sub-channels and the initial offer. The second member is the
/// [`PeerRole::Joiner`] and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Initiator,
    Joiner,
}

impl PeerRole {
    /// Maps the relay's `isInitiator` flag to a role.
    pub fn from_initiator_flag(is_initiator: bool) -> Self {
        if is_initiator {
            PeerRole::Initiator
        } else {
            PeerRole::Joiner
        }
    }

    pub fn is_initiator(&self) -> bool {
        matches!(self, PeerRole::Initiator)
    }
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description as exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate as exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Metadata announced in a `file-request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

pub(crate) fn default_mime_type() -> String {
    "application/octet-stream".into()
}

impl FileMeta {
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
        }
    }

    /// Number of data frames needed to carry this file at `chunk_size`.
    ///
    /// An empty file needs no frames.
    pub fn chunk_count(&self, chunk_size: usize) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(chunk_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_role_from_flag() {
        assert_eq!(PeerRole::from_initiator_flag(true), PeerRole::Initiator);
        assert_eq!(PeerRole::from_initiator_flag(false), PeerRole::Joiner);
        assert!(PeerRole::Initiator.is_initiator());
        assert!(!PeerRole::Joiner.is_initiator());
    }

    #[test]
    fn session_description_wire_shape() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }

    #[test]
    fn ice_candidate_wire_shape() {
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json.get("usernameFragment").is_none());

        let parsed: IceCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn file_meta_defaults_mime() {
        let meta: FileMeta = serde_json::from_str(r#"{"name":"a.bin","size":3}"#).unwrap();
        assert_eq!(meta.mime_type, "application/octet-stream");
    }

    #[test]
    fn chunk_count_edges() {
        let chunk = 250 * 1024;
        assert_eq!(FileMeta::new("a", 10, "x").chunk_count(chunk), 1);
        assert_eq!(FileMeta::new("b", 300_000, "x").chunk_count(chunk), 2);
        assert_eq!(FileMeta::new("c", 2 * chunk as u64, "x").chunk_count(chunk), 2);
        assert_eq!(FileMeta::new("d", 0, "x").chunk_count(chunk), 0);
    }
}
