//! Peer connection negotiation.
//!
//! [`NegotiationEngine`] turns relay envelopes into an established peer
//! connection: the initiator offers once a second member is present, the
//! joiner answers, and remote candidates are buffered until a remote
//! description exists. Once ready, the connection hands over its two
//! sub-channels as [`SubChannels`].

pub mod candidates;
pub mod engine;
pub mod error;
pub mod peer;
pub mod rtc;
pub mod types;

pub use candidates::CandidateBuffer;
pub use engine::NegotiationEngine;
pub use error::NegotiationError;
pub use peer::{PeerConnection, PeerConnector, PeerFuture, SignalSender};
pub use rtc::{WebRtcConnector, WebRtcPeer};
pub use types::{IceServerConfig, NegotiationState, PeerEvent, PeerState, SubChannels};
