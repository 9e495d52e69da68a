//! Offer/answer state machine.
//!
//! The engine owns the current peer connection and reacts to two inputs:
//! envelopes forwarded by the relay ([`NegotiationEngine::handle_envelope`])
//! and events raised by the peer connection
//! ([`NegotiationEngine::handle_peer_event`]). Both are expected to be
//! driven from one task, so the engine never sees them concurrently.
//!
//! Faults while applying a signal are logged and the signal is skipped:
//! duplicates and late arrivals are normal during races.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, trace, warn};

use peerdrop_protocol::constants::SignalType;
use peerdrop_protocol::{Envelope, PeerRole, ProtocolError, SdpType, SessionDescription};

use crate::candidates::CandidateBuffer;
use crate::error::NegotiationError;
use crate::peer::{PeerConnection, PeerConnector, SignalSender};
use crate::types::{NegotiationState, PeerEvent, PeerState, SubChannels};

const PEER_EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct Negotiation {
    room: Option<String>,
    role: Option<PeerRole>,
    peer: Option<Arc<dyn PeerConnection>>,
    remote_set: bool,
    /// Offer or answer that arrived before a peer existed.
    pending_remote: Option<SessionDescription>,
    candidates: CandidateBuffer,
}

pub struct NegotiationEngine {
    connector: Arc<dyn PeerConnector>,
    signal: Arc<dyn SignalSender>,
    inner: Mutex<Negotiation>,
    state_tx: watch::Sender<NegotiationState>,
    events_tx: mpsc::Sender<PeerEvent>,
    generation: Arc<AtomicU64>,
}

impl NegotiationEngine {
    /// Creates an idle engine. Events from every peer connection it builds
    /// are forwarded into the returned receiver; events from a replaced
    /// peer are dropped.
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        signal: Arc<dyn SignalSender>,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(NegotiationState::Idle);
        let engine = Self {
            connector,
            signal,
            inner: Mutex::new(Negotiation::default()),
            state_tx,
            events_tx,
            generation: Arc::new(AtomicU64::new(0)),
        };
        (engine, events_rx)
    }

    pub fn state(&self) -> NegotiationState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<NegotiationState> {
        self.state_tx.subscribe()
    }

    pub async fn role(&self) -> Option<PeerRole> {
        self.inner.lock().await.role
    }

    /// Records the room being joined so outgoing signals can be addressed
    /// before the relay confirms.
    pub async fn set_room(&self, room: &str) {
        self.inner.lock().await.room = Some(room.to_string());
    }

    /// Applies one relay envelope.
    pub async fn handle_envelope(&self, envelope: &Envelope) {
        let mut inner = self.inner.lock().await;
        let result = match envelope.signal {
            SignalType::Joined => self.on_joined(&mut inner, envelope).await,
            SignalType::PeerJoined => self.on_peer_joined(&mut inner).await,
            SignalType::Offer | SignalType::Answer => {
                match envelope.description() {
                    Ok(desc) => self.on_remote_description(&mut inner, desc.clone()).await,
                    Err(e) => Err(e.into()),
                }
            }
            SignalType::IceCandidate => self.on_remote_candidate(&mut inner, envelope).await,
            SignalType::PeerLeft => {
                info!("peer left the room");
                self.reset_peer(&mut inner).await
            }
            SignalType::RoomState => {
                debug!(peer_count = ?envelope.peer_count, "room state");
                Ok(())
            }
            SignalType::Error => {
                warn!(message = ?envelope.message, "relay reported an error");
                Ok(())
            }
            SignalType::Join | SignalType::Unknown => {
                trace!(signal = envelope.signal.as_str(), "ignoring envelope");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(signal = envelope.signal.as_str(), "negotiation step skipped: {e}");
        }
    }

    /// Applies one peer event. Sub-channels are handed back to the caller.
    pub async fn handle_peer_event(&self, event: PeerEvent) -> Option<SubChannels> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let room = self.inner.lock().await.room.clone();
                match room {
                    Some(room) => {
                        if !self.signal.send_signal(Envelope::candidate(room, candidate)).await {
                            debug!("local candidate not forwarded, relay link down");
                        }
                    }
                    None => debug!("local candidate without a room, dropping"),
                }
                None
            }
            PeerEvent::StateChanged(state) => {
                debug!(?state, "peer connection state");
                match state {
                    PeerState::Connected => {
                        info!("peer connected");
                        self.set_state(NegotiationState::Connected);
                    }
                    PeerState::Disconnected | PeerState::Closed => {
                        if !self.state().is_down() && self.state() != NegotiationState::Idle {
                            self.set_state(NegotiationState::Disconnected);
                        }
                    }
                    PeerState::Failed => self.set_state(NegotiationState::Failed),
                    PeerState::New | PeerState::Connecting => {}
                }
                None
            }
            PeerEvent::ChannelsReady(channels) => Some(channels),
        }
    }

    /// A sub-channel closed under an established session.
    pub fn channel_closed(&self) {
        if self.state() == NegotiationState::Connected {
            self.set_state(NegotiationState::Disconnected);
        }
    }

    /// Tears down the peer and forgets the room and role.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(peer) = inner.peer.take() {
            peer.close().await;
        }
        *inner = Negotiation::default();
        self.set_state(NegotiationState::Idle);
    }

    async fn on_joined(
        &self,
        inner: &mut Negotiation,
        envelope: &Envelope,
    ) -> Result<(), NegotiationError> {
        let role = envelope.role()?;
        if let Some(room) = &envelope.room {
            inner.room = Some(room.clone());
        }

        if inner.role == Some(role) && inner.peer.is_some() {
            debug!(?role, "re-joined after reconnect, keeping peer");
            return Ok(());
        }
        if let Some(peer) = inner.peer.take() {
            warn!(?role, "role changed, replacing peer connection");
            peer.close().await;
            inner.remote_set = false;
        }

        info!(room = ?inner.room, ?role, "joined room");
        inner.role = Some(role);
        self.set_state(NegotiationState::AwaitingPeer);

        if role.is_initiator() {
            self.create_peer(inner, role).await?;
        }
        if let Some(desc) = inner.pending_remote.take() {
            debug!(sdp_type = ?desc.sdp_type, "replaying description received before join");
            self.on_remote_description(inner, desc).await?;
        }
        Ok(())
    }

    async fn on_peer_joined(&self, inner: &mut Negotiation) -> Result<(), NegotiationError> {
        if inner.role != Some(PeerRole::Initiator) {
            debug!("peer-joined ignored, not the initiator");
            return Ok(());
        }
        let room = room_of(inner, "peer-joined")?;
        let peer = match &inner.peer {
            Some(peer) => peer.clone(),
            None => self.create_peer(inner, PeerRole::Initiator).await?,
        };

        if let Some(local) = peer.local_description().await {
            if local.sdp_type == SdpType::Offer {
                debug!("peer-joined again, re-sending cached offer");
                self.signal.send_signal(Envelope::offer(room, local)).await;
                return Ok(());
            }
        }

        let offer = peer.create_offer().await?;
        info!(room = %room, "sending offer");
        self.signal.send_signal(Envelope::offer(room, offer)).await;
        self.set_state(NegotiationState::OfferSent);
        Ok(())
    }

    async fn on_remote_description(
        &self,
        inner: &mut Negotiation,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        match desc.sdp_type {
            SdpType::Offer => self.on_offer(inner, desc).await,
            SdpType::Answer => self.on_answer(inner, desc).await,
            other => Err(NegotiationError::InvalidDescription(format!(
                "unsupported description type {other:?}"
            ))),
        }
    }

    async fn on_offer(
        &self,
        inner: &mut Negotiation,
        offer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        match inner.role {
            None => {
                debug!("offer before joined, caching");
                inner.pending_remote = Some(offer);
                return Ok(());
            }
            Some(PeerRole::Initiator) => {
                return Err(NegotiationError::InvalidTransition {
                    signal: "offer",
                    state: self.state(),
                });
            }
            Some(PeerRole::Joiner) => {}
        }

        let peer = match &inner.peer {
            Some(peer) => peer.clone(),
            None => {
                let peer = self.create_peer(inner, PeerRole::Joiner).await?;
                // Let the connection's own channel handlers register first.
                tokio::task::yield_now().await;
                peer
            }
        };

        if inner.remote_set {
            if let Some(local) = peer.local_description().await {
                debug!("duplicate offer, re-sending answer");
                let room = room_of(inner, "offer")?;
                self.signal.send_signal(Envelope::answer(room, local)).await;
            }
            return Ok(());
        }

        self.set_state(NegotiationState::OfferReceived);
        peer.set_remote_description(offer).await?;
        inner.remote_set = true;
        self.flush_candidates(inner, &peer).await;

        let answer = peer.create_answer().await?;
        let room = room_of(inner, "offer")?;
        info!(room = %room, "sending answer");
        self.signal.send_signal(Envelope::answer(room, answer)).await;
        self.set_state(NegotiationState::AnswerSent);
        Ok(())
    }

    async fn on_answer(
        &self,
        inner: &mut Negotiation,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if inner.role == Some(PeerRole::Joiner) {
            return Err(NegotiationError::InvalidTransition {
                signal: "answer",
                state: self.state(),
            });
        }
        let Some(peer) = inner.peer.clone() else {
            debug!("answer before peer exists, caching");
            inner.pending_remote = Some(answer);
            return Ok(());
        };
        if inner.remote_set {
            debug!("duplicate answer ignored");
            return Ok(());
        }
        if self.state() != NegotiationState::OfferSent {
            return Err(NegotiationError::InvalidTransition {
                signal: "answer",
                state: self.state(),
            });
        }

        peer.set_remote_description(answer).await?;
        inner.remote_set = true;
        debug!("answer applied, waiting for transport");
        self.flush_candidates(inner, &peer).await;
        Ok(())
    }

    async fn on_remote_candidate(
        &self,
        inner: &mut Negotiation,
        envelope: &Envelope,
    ) -> Result<(), NegotiationError> {
        let candidate = envelope
            .candidate
            .clone()
            .ok_or(ProtocolError::MissingField {
                signal: "ice-candidate",
                field: "candidate",
            })?;

        match &inner.peer {
            Some(peer) if inner.remote_set => {
                trace!(candidate = %candidate.candidate, "applying remote candidate");
                peer.add_ice_candidate(candidate).await
            }
            _ => {
                trace!(buffered = inner.candidates.len() + 1, "buffering remote candidate");
                inner.candidates.push(candidate);
                Ok(())
            }
        }
    }

    /// Applies every buffered candidate in arrival order.
    async fn flush_candidates(&self, inner: &mut Negotiation, peer: &Arc<dyn PeerConnection>) {
        let buffered = inner.candidates.drain();
        if buffered.is_empty() {
            return;
        }
        debug!(count = buffered.len(), "flushing buffered candidates");
        for candidate in buffered {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!("buffered candidate rejected: {e}");
            }
        }
    }

    /// Drops the current peer and waits for a new one. The initiator
    /// builds its replacement connection right away.
    async fn reset_peer(&self, inner: &mut Negotiation) -> Result<(), NegotiationError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(peer) = inner.peer.take() {
            peer.close().await;
        }
        inner.remote_set = false;
        inner.pending_remote = None;
        inner.candidates.clear();

        let Some(role) = inner.role else {
            self.set_state(NegotiationState::Idle);
            return Ok(());
        };
        self.set_state(NegotiationState::AwaitingPeer);
        if role.is_initiator() {
            self.create_peer(inner, role).await?;
        }
        Ok(())
    }

    async fn create_peer(
        &self,
        inner: &mut Negotiation,
        role: PeerRole,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        tokio::spawn(forward_peer_events(
            rx,
            self.events_tx.clone(),
            self.generation.clone(),
            generation,
        ));

        let peer = self.connector.connect(role, tx).await?;
        debug!(?role, generation, "peer connection created");
        inner.peer = Some(peer.clone());
        inner.remote_set = false;
        Ok(peer)
    }

    fn set_state(&self, state: NegotiationState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "negotiation state");
        }
    }
}

fn room_of(inner: &Negotiation, signal: &'static str) -> Result<String, NegotiationError> {
    inner.room.clone().ok_or(NegotiationError::NoRoom(signal))
}

async fn forward_peer_events(
    mut rx: mpsc::Receiver<PeerEvent>,
    tx: mpsc::Sender<PeerEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
) {
    while let Some(event) = rx.recv().await {
        if current.load(Ordering::SeqCst) != generation {
            trace!(generation, "dropping event from replaced peer");
            continue;
        }
        if tx.send(event).await.is_err() {
            break;
        }
    }
}
