//! Commands accepted and events emitted by a session.

use peerdrop_data_channel::TransportOptions;
use peerdrop_negotiation::NegotiationState;
use peerdrop_protocol::{FileMeta, PeerRole, RoomCode, TransferConfig};
use peerdrop_rendezvous::LinkState;
use peerdrop_transfer::{FileSource, ReceivedFile, SendEvent, TransferProgress};

/// Settings for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    pub transfer: TransferConfig,
}

impl SessionConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            transfer: TransferConfig::default(),
        }
    }

    pub(crate) fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            low_water_mark: self.transfer.low_water_mark,
            ..Default::default()
        }
    }
}

/// User intent fed into the session loop.
#[derive(Debug)]
pub enum Command {
    /// Generate a room code and join it.
    Create,
    /// Join an existing room.
    Join(String),
    /// Queue files for sending. They start once the channels are open.
    SendFiles(Vec<FileSource>),
    /// Accept the pending incoming offer.
    Accept,
    /// Decline the pending incoming offer.
    Reject,
    Pause,
    Resume,
    /// Abort outgoing and incoming transfers.
    Cancel,
    /// Tear everything down and leave the room.
    Leave,
}

/// What a session reports.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A fresh room code to share with the other peer.
    RoomCreated(RoomCode),
    Joined {
        room: String,
        role: PeerRole,
    },
    Relay(LinkState),
    PeerJoined,
    PeerLeft,
    Negotiation(NegotiationState),
    /// Both sub-channels are open.
    ChannelOpen,
    /// The peer proposes a file; answer with [`Command::Accept`] or
    /// [`Command::Reject`].
    IncomingOffer(FileMeta),
    IncomingProgress(TransferProgress),
    FileReceived(ReceivedFile),
    /// An incoming transfer ended in error or was cancelled.
    IncomingFailed {
        name: String,
        reason: String,
    },
    /// Progress and outcomes of outgoing files.
    Outgoing(SendEvent),
    /// The peer transport went away.
    Disconnected,
    Left,
    /// A command could not be carried out.
    Error(String),
}
