//! The session loop.
//!
//! One task owns the [`SessionContext`] and selects over user commands,
//! relay events, peer events, negotiation state, transport events and
//! send-queue events. Nothing else mutates session state, so handlers
//! never race each other.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use peerdrop_data_channel::{ChannelTransport, TransportEvent};
use peerdrop_negotiation::{
    NegotiationEngine, NegotiationState, PeerConnector, PeerEvent, SubChannels,
};
use peerdrop_protocol::{ChunkFrame, ControlMessage, Envelope, RoomCode, SignalType};
use peerdrop_rendezvous::{LinkEvent, RendezvousClient};
use peerdrop_transfer::{ChunkOutcome, ChunkReceiver, ChunkStore, FileSource, SendQueue};

use crate::context::SessionContext;
use crate::error::SessionError;
use crate::types::{Command, SessionConfig, SessionEvent};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;
const SEND_EVENT_CAPACITY: usize = 256;

/// Handle to a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub async fn create(&self) -> Result<(), SessionError> {
        self.send(Command::Create).await
    }

    pub async fn join(&self, room: impl Into<String>) -> Result<(), SessionError> {
        self.send(Command::Join(room.into())).await
    }

    pub async fn send_files(&self, files: Vec<FileSource>) -> Result<(), SessionError> {
        self.send(Command::SendFiles(files)).await
    }

    pub async fn accept(&self) -> Result<(), SessionError> {
        self.send(Command::Accept).await
    }

    pub async fn reject(&self) -> Result<(), SessionError> {
        self.send(Command::Reject).await
    }

    pub async fn leave(&self) -> Result<(), SessionError> {
        self.send(Command::Leave).await
    }

    /// Stops the loop after the commands already sent, and waits for it.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!("session task ended abnormally: {e}");
        }
    }
}

pub struct SessionController {
    config: SessionConfig,
    link: RendezvousClient,
    engine: NegotiationEngine,
    store: Arc<dyn ChunkStore>,
    ctx: SessionContext,
    commands: mpsc::Receiver<Command>,
    link_events: broadcast::Receiver<LinkEvent>,
    peer_events: mpsc::Receiver<PeerEvent>,
    negotiation: watch::Receiver<NegotiationState>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionController {
    /// Starts a session on its own task.
    pub fn spawn(
        config: SessionConfig,
        link: RendezvousClient,
        connector: Arc<dyn PeerConnector>,
        store: Arc<dyn ChunkStore>,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let (engine, peer_events) = NegotiationEngine::new(connector, Arc::new(link.clone()));
        let controller = Self {
            link_events: link.subscribe(),
            negotiation: engine.subscribe_state(),
            config,
            link,
            engine,
            store,
            ctx: SessionContext::default(),
            commands,
            peer_events,
            events,
        };
        let task = tokio::spawn(controller.run());

        (
            SessionHandle {
                commands: commands_tx,
                task,
            },
            events_rx,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if let Err(e) = self.on_command(command).await {
                        warn!("command failed: {e}");
                        self.emit(SessionEvent::Error(e.to_string())).await;
                    }
                }
                event = self.link_events.recv() => match event {
                    Ok(event) => self.on_link_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session fell behind relay events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = self.peer_events.recv() => {
                    if let Some(channels) = self.engine.handle_peer_event(event).await {
                        self.attach(channels).await;
                    }
                }
                changed = self.negotiation.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *self.negotiation.borrow_and_update();
                    self.on_negotiation_state(state).await;
                }
                event = recv_some(&mut self.ctx.transport_events) => {
                    self.on_transport_event(event).await;
                }
                event = recv_some(&mut self.ctx.send_events) => match event {
                    Some(event) => self.emit(SessionEvent::Outgoing(event)).await,
                    None => self.ctx.send_events = None,
                },
            }
        }

        debug!("session loop stopping");
        self.teardown().await;
    }

    async fn on_command(&mut self, command: Command) -> Result<(), SessionError> {
        match command {
            Command::Create => {
                self.ensure_no_room()?;
                let code = RoomCode::generate();
                self.emit(SessionEvent::RoomCreated(code.clone())).await;
                self.join_room(code).await;
            }
            Command::Join(input) => {
                self.ensure_no_room()?;
                let code = RoomCode::parse(&input)?;
                self.join_room(code).await;
            }
            Command::SendFiles(files) => {
                info!(count = files.len(), "files queued");
                self.ctx.pending_files.extend(files);
                self.start_queue();
            }
            Command::Accept => {
                let receiver = self.ctx.receiver.as_mut().ok_or(SessionError::NotConnected)?;
                let name = receiver.meta().map(|m| m.name.clone()).unwrap_or_default();
                match receiver.accept().await {
                    Ok(Some(file)) => self.emit(SessionEvent::FileReceived(file)).await,
                    Ok(None) => {}
                    Err(e) => {
                        self.emit(SessionEvent::IncomingFailed {
                            name,
                            reason: e.to_string(),
                        })
                        .await
                    }
                }
            }
            Command::Reject => {
                let receiver = self.ctx.receiver.as_mut().ok_or(SessionError::NotConnected)?;
                receiver.reject().await?;
            }
            Command::Pause => {
                self.ctx.paused = true;
                if let Some(queue) = &self.ctx.queue {
                    queue.pause();
                }
            }
            Command::Resume => {
                self.ctx.paused = false;
                if let Some(queue) = &self.ctx.queue {
                    queue.resume();
                }
            }
            Command::Cancel => {
                self.ctx.pending_files.clear();
                if let Some(queue) = &self.ctx.queue {
                    queue.cancel();
                }
                if let Some(receiver) = self.ctx.receiver.as_mut() {
                    let name = receiver.meta().map(|m| m.name.clone()).unwrap_or_default();
                    if receiver.cancel().await {
                        self.emit(SessionEvent::IncomingFailed {
                            name,
                            reason: "cancelled".into(),
                        })
                        .await;
                    }
                }
            }
            Command::Leave => {
                self.teardown().await;
                self.emit(SessionEvent::Left).await;
            }
        }
        Ok(())
    }

    fn ensure_no_room(&self) -> Result<(), SessionError> {
        match &self.ctx.room {
            Some(room) => Err(SessionError::AlreadyInRoom(room.to_string())),
            None => Ok(()),
        }
    }

    async fn join_room(&mut self, code: RoomCode) {
        info!(room = %code, relay = %self.config.relay_url, "entering room");
        self.engine.set_room(code.as_str()).await;
        if let Err(e) = self.link.connect(&self.config.relay_url).await {
            // The reconnect loop keeps trying and re-sends the join on open.
            warn!("relay unreachable for now: {e}");
        }
        self.link.join(code.as_str()).await;
        self.ctx.room = Some(code);
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        let envelope = match event {
            LinkEvent::StateChanged(state) => {
                self.emit(SessionEvent::Relay(state)).await;
                return;
            }
            LinkEvent::Envelope(envelope) => envelope,
        };

        if envelope.signal == SignalType::PeerLeft {
            self.detach("peer left").await;
        }
        self.engine.handle_envelope(&envelope).await;

        match envelope.signal {
            SignalType::Joined => self.on_joined(&envelope).await,
            SignalType::PeerJoined => self.emit(SessionEvent::PeerJoined).await,
            SignalType::PeerLeft => self.emit(SessionEvent::PeerLeft).await,
            SignalType::Error => {
                let message = envelope.message.unwrap_or_else(|| "relay error".into());
                self.emit(SessionEvent::Error(message)).await;
            }
            _ => {}
        }
    }

    async fn on_joined(&mut self, envelope: &Envelope) {
        let Ok(role) = envelope.role() else { return };
        self.ctx.role = Some(role);
        let room = envelope
            .room
            .clone()
            .or_else(|| self.ctx.room.as_ref().map(|r| r.to_string()))
            .unwrap_or_default();
        self.emit(SessionEvent::Joined { room, role }).await;
    }

    async fn on_negotiation_state(&mut self, state: NegotiationState) {
        debug!(?state, "negotiation state");
        if state.is_down() {
            self.detach("peer connection lost").await;
        }
        self.emit(SessionEvent::Negotiation(state)).await;
    }

    /// Wraps fresh sub-channels in a transport, replacing any previous one.
    async fn attach(&mut self, channels: SubChannels) {
        self.detach("replaced by a new peer connection").await;

        let (transport, events) = ChannelTransport::new(
            channels.control,
            channels.control_events,
            channels.data,
            channels.data_events,
            self.config.transport_options(),
        )
        .await;
        debug!("sub-channels attached");

        self.ctx.receiver = Some(ChunkReceiver::new(transport.clone(), self.store.clone()));
        self.ctx.transport = Some(transport);
        self.ctx.transport_events = Some(events);
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Open) => {
                info!("channels open");
                self.emit(SessionEvent::ChannelOpen).await;
                self.start_queue();
            }
            Some(TransportEvent::Control(msg)) => self.on_control(msg).await,
            Some(TransportEvent::Chunk(frame)) => self.on_chunk(frame).await,
            Some(TransportEvent::Closed { label }) => {
                warn!(label = %label, "sub-channel closed");
                self.engine.channel_closed();
                self.detach("sub-channel closed").await;
                self.emit(SessionEvent::Disconnected).await;
            }
            None => {
                self.ctx.transport_events = None;
                self.detach("transport stopped").await;
            }
        }
    }

    async fn on_control(&mut self, msg: ControlMessage) {
        trace!(kind = msg.kind(), "control message");
        match msg {
            ControlMessage::FileRequest { .. } => {
                let (Some(meta), Some(receiver)) = (msg.file_meta(), self.ctx.receiver.as_mut())
                else {
                    return;
                };
                match receiver.on_file_request(meta.clone()).await {
                    Ok(()) => self.emit(SessionEvent::IncomingOffer(meta)).await,
                    Err(e) => debug!(file = %meta.name, "file request refused: {e}"),
                }
            }
            ControlMessage::FileAccept
            | ControlMessage::FileReject
            | ControlMessage::Ack { .. }
            | ControlMessage::FileComplete { .. } => match &self.ctx.queue {
                Some(queue) => queue.deliver(msg),
                None => debug!(kind = msg.kind(), "no outgoing transfer, dropping"),
            },
            ControlMessage::Cancel => {
                if let Some(queue) = &self.ctx.queue {
                    queue.deliver(ControlMessage::Cancel);
                }
                if let Some(receiver) = self.ctx.receiver.as_mut() {
                    let name = receiver.meta().map(|m| m.name.clone()).unwrap_or_default();
                    if receiver.on_cancel().await {
                        self.emit(SessionEvent::IncomingFailed {
                            name,
                            reason: "cancelled by peer".into(),
                        })
                        .await;
                    }
                }
            }
            ControlMessage::Ping | ControlMessage::Pong => {}
        }
    }

    async fn on_chunk(&mut self, frame: ChunkFrame) {
        let Some(receiver) = self.ctx.receiver.as_mut() else {
            return;
        };
        let name = receiver.meta().map(|m| m.name.clone()).unwrap_or_default();
        match receiver.on_chunk(frame).await {
            Ok(ChunkOutcome::Progress(progress)) => {
                self.emit(SessionEvent::IncomingProgress(progress)).await
            }
            Ok(ChunkOutcome::Complete(file)) => self.emit(SessionEvent::FileReceived(file)).await,
            Ok(ChunkOutcome::Buffered | ChunkOutcome::Ignored) => {}
            Err(e) => {
                self.emit(SessionEvent::IncomingFailed {
                    name,
                    reason: e.to_string(),
                })
                .await
            }
        }
    }

    /// Hands pending files to the send queue once the channels are open,
    /// starting a queue if none is running.
    fn start_queue(&mut self) {
        if !self.ctx.is_connected() || self.ctx.pending_files.is_empty() {
            return;
        }
        let Some(transport) = self.ctx.transport.clone() else {
            return;
        };

        if self.ctx.live_queue().is_none() {
            let (events_tx, events_rx) = mpsc::channel(SEND_EVENT_CAPACITY);
            let queue = SendQueue::spawn(transport, self.config.transfer, events_tx);
            if self.ctx.paused {
                queue.pause();
            }
            self.ctx.queue = Some(queue);
            self.ctx.send_events = Some(events_rx);
        }

        // Same check as `live_queue()`, on the field so `pending_files` can be borrowed mutably.
        if let Some(queue) = self.ctx.queue.as_ref().filter(|q| !q.is_finished()) {
            for file in self.ctx.pending_files.drain(..) {
                if !queue.enqueue(file) {
                    warn!("send queue stopped while enqueueing");
                    break;
                }
            }
        }
    }

    /// Drops the transport and everything riding on it. An incoming
    /// transfer in flight ends in error.
    async fn detach(&mut self, reason: &str) {
        if let Some(queue) = self.ctx.queue.take() {
            queue.cancel();
        }
        if let Some(mut receiver) = self.ctx.receiver.take()
            && !receiver.state().is_terminal()
        {
            let name = receiver.meta().map(|m| m.name.clone()).unwrap_or_default();
            receiver.on_transport_closed().await;
            self.emit(SessionEvent::IncomingFailed {
                name,
                reason: reason.to_string(),
            })
            .await;
        }
        self.ctx.transport_events = None;
        if let Some(transport) = self.ctx.transport.take() {
            debug!(reason, "closing transport");
            transport.close().await;
        }
    }

    async fn teardown(&mut self) {
        self.ctx.pending_files.clear();
        self.detach("session closed").await;
        self.engine.close().await;
        self.link.leave().await;
        self.ctx.room = None;
        self.ctx.role = None;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            trace!("session event receiver dropped");
        }
    }
}

/// Receives from an optional channel; pending forever when absent.
async fn recv_some<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
