//! Seams between the engine and the outside world.
//!
//! [`PeerConnector`] builds peer connections (WebRTC in production, fakes
//! in tests) and [`SignalSender`] carries envelopes to the relay.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use peerdrop_protocol::{Envelope, IceCandidate, PeerRole, SessionDescription};
use peerdrop_rendezvous::RendezvousClient;

use crate::error::NegotiationError;
use crate::types::PeerEvent;

pub type PeerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One peer connection.
pub trait PeerConnection: Send + Sync {
    /// Creates an offer and applies it as the local description.
    fn create_offer(&self) -> PeerFuture<'_, Result<SessionDescription, NegotiationError>>;

    /// Creates an answer and applies it as the local description.
    fn create_answer(&self) -> PeerFuture<'_, Result<SessionDescription, NegotiationError>>;

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> PeerFuture<'_, Result<(), NegotiationError>>;

    /// Only valid once a remote description is set.
    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> PeerFuture<'_, Result<(), NegotiationError>>;

    fn local_description(&self) -> PeerFuture<'_, Option<SessionDescription>>;

    fn close(&self) -> PeerFuture<'_, ()>;
}

/// Builds peer connections for a role.
///
/// The initiator's connection creates both sub-channels up front and
/// reports them through `events` as soon as they exist; the joiner's waits
/// for the remote side to open them.
pub trait PeerConnector: Send + Sync {
    fn connect(
        &self,
        role: PeerRole,
        events: mpsc::Sender<PeerEvent>,
    ) -> PeerFuture<'_, Result<Arc<dyn PeerConnection>, NegotiationError>>;
}

/// Outbound signaling.
pub trait SignalSender: Send + Sync {
    /// Returns `false` when the envelope could not be handed to the relay.
    fn send_signal(&self, envelope: Envelope) -> PeerFuture<'_, bool>;
}

impl SignalSender for RendezvousClient {
    fn send_signal(&self, envelope: Envelope) -> PeerFuture<'_, bool> {
        Box::pin(async move { self.send(&envelope).await })
    }
}
