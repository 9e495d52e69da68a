use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use peerdrop_data_channel::{ChannelEvent, SubChannel};
use peerdrop_protocol::IceCandidate;

/// Negotiation progress as seen by the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingPeer,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Connected,
    Disconnected,
    Failed,
}

impl NegotiationState {
    /// Terminal for the current peer object; a new peer must be built.
    pub fn is_down(&self) -> bool {
        matches!(self, NegotiationState::Disconnected | NegotiationState::Failed)
    }
}

/// Connectivity reported by the peer transport, independent of the
/// offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Both sub-channels with their event receivers, ready to be wrapped in a
/// [`peerdrop_data_channel::ChannelTransport`].
pub struct SubChannels {
    pub control: Arc<dyn SubChannel>,
    pub control_events: mpsc::Receiver<ChannelEvent>,
    pub data: Arc<dyn SubChannel>,
    pub data_events: mpsc::Receiver<ChannelEvent>,
}

impl fmt::Debug for SubChannels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubChannels")
            .field("control", &self.control.label())
            .field("data", &self.data.label())
            .finish()
    }
}

/// Events raised by a peer connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// A locally gathered candidate to forward through the relay.
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
    /// The initiator created its sub-channels, or the joiner received both.
    ChannelsReady(SubChannels),
}

/// A STUN or TURN server handed to the peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }

    /// Public STUN server used when nothing is configured.
    pub fn default_servers() -> Vec<Self> {
        vec![Self::stun("stun:stun.l.google.com:19302")]
    }
}
