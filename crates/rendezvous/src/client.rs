//! Public handle on the relay link.

use std::sync::atomic::Ordering;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use peerdrop_protocol::Envelope;

use crate::link::LinkError;
use crate::reconnection::{LinkContext, cancel_reconnect, establish, start_reconnect};
use crate::types::{LinkEvent, LinkState, ReconnectConfig};

const EVENT_CAPACITY: usize = 256;

/// Reconnecting client for the signaling relay.
///
/// Cheap to clone; every clone drives the same link. Incoming envelopes and
/// state changes are broadcast to every [`RendezvousClient::subscribe`]r.
#[derive(Clone)]
pub struct RendezvousClient {
    ctx: LinkContext,
}

impl Default for RendezvousClient {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl RendezvousClient {
    pub fn new(reconnect_config: ReconnectConfig) -> Self {
        Self {
            ctx: LinkContext::new(reconnect_config, EVENT_CAPACITY),
        }
    }

    /// Opens the link. No-op while the link is already open or connecting.
    ///
    /// A failed first attempt schedules the reconnect loop and returns the
    /// error.
    pub async fn connect(&self, url: &str) -> Result<(), LinkError> {
        {
            let mut state = self.ctx.state.write().await;
            if state.is_active() {
                debug!(url, state = ?*state, "connect ignored, link already active");
                return Ok(());
            }
            *state = LinkState::Connecting;
        }
        let _ = self
            .ctx
            .events_tx
            .send(LinkEvent::StateChanged(LinkState::Connecting));

        cancel_reconnect(&self.ctx.reconnect_cancel);
        self.ctx.manual_close.store(false, Ordering::Relaxed);
        *self.ctx.url.write().await = Some(url.to_string());

        match establish(&self.ctx, url).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(url, "relay connect failed: {e}");
                start_reconnect(&self.ctx);
                Err(e)
            }
        }
    }

    /// Sends an envelope. Returns `false` (with a warning) when the link is
    /// not open.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        if *self.ctx.state.read().await != LinkState::Open {
            warn!(
                signal = envelope.signal.as_str(),
                "relay link not open, dropping envelope"
            );
            return false;
        }

        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode envelope: {e}");
                return false;
            }
        };

        let guard = self.ctx.link.lock().await;
        match guard.as_ref() {
            Some(link) => link.send_text(json).await.is_ok(),
            None => {
                warn!(signal = envelope.signal.as_str(), "relay link gone, dropping envelope");
                false
            }
        }
    }

    /// Remembers `room` and sends `join` if the link is open. The join is
    /// re-sent automatically every time the link (re)opens.
    pub async fn join(&self, room: &str) -> bool {
        *self.ctx.room.write().await = Some(room.to_string());
        info!(room, "joining room");
        if *self.ctx.state.read().await == LinkState::Open {
            self.send(&Envelope::join(room)).await
        } else {
            false
        }
    }

    /// Forgets the room and closes the link.
    pub async fn leave(&self) {
        self.ctx.room.write().await.take();
        self.close().await;
    }

    /// Closes the link normally. No reconnect follows.
    pub async fn close(&self) {
        self.ctx.manual_close.store(true, Ordering::Relaxed);
        cancel_reconnect(&self.ctx.reconnect_cancel);
        if let Some(link) = self.ctx.link.lock().await.take() {
            link.close();
        }
        self.ctx.set_state(LinkState::Disconnected).await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.ctx.events_tx.subscribe()
    }

    pub async fn state(&self) -> LinkState {
        self.ctx.state.read().await.clone()
    }

    pub async fn room(&self) -> Option<String> {
        self.ctx.room.read().await.clone()
    }
}
