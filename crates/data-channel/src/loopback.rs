//! In-process sub-channel pairs.
//!
//! Each end counts bytes it has queued but not yet delivered as its
//! buffered amount. Delivery to the other end can be paused to build up a
//! backlog, and sends can be made to fail on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::channel::{ChannelEvent, ChannelFuture, Payload, SubChannel};
use crate::error::ChannelError;

const EVENT_CAPACITY: usize = 1024;

/// One end of an in-process sub-channel pair.
pub struct LoopbackChannel {
    label: String,
    open: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
    low_water: Arc<AtomicUsize>,
    peak_at_send: AtomicUsize,
    reject_sends: AtomicU32,
    outbound: mpsc::UnboundedSender<Payload>,
    own_events: mpsc::Sender<ChannelEvent>,
    peer_events: mpsc::Sender<ChannelEvent>,
    gate: watch::Sender<bool>,
}

/// A channel end plus the receiver for its events.
pub type LoopbackEnd = (Arc<LoopbackChannel>, mpsc::Receiver<ChannelEvent>);

/// Creates a connected pair. Both ends start closed; call
/// [`LoopbackChannel::open`] on either end.
pub fn pair(label: &str) -> (LoopbackEnd, LoopbackEnd) {
    let open = Arc::new(AtomicBool::new(false));
    let (a_events_tx, a_events_rx) = mpsc::channel(EVENT_CAPACITY);
    let (b_events_tx, b_events_rx) = mpsc::channel(EVENT_CAPACITY);

    let a = LoopbackChannel::spawn(label, open.clone(), a_events_tx.clone(), b_events_tx.clone());
    let b = LoopbackChannel::spawn(label, open, b_events_tx, a_events_tx);

    ((a, a_events_rx), (b, b_events_rx))
}

impl LoopbackChannel {
    fn spawn(
        label: &str,
        open: Arc<AtomicBool>,
        own_events: mpsc::Sender<ChannelEvent>,
        peer_events: mpsc::Sender<ChannelEvent>,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (gate, gate_rx) = watch::channel(true);
        let buffered = Arc::new(AtomicUsize::new(0));
        let low_water = Arc::new(AtomicUsize::new(0));

        tokio::spawn(deliver(
            outbound_rx,
            gate_rx,
            open.clone(),
            buffered.clone(),
            low_water.clone(),
            own_events.clone(),
            peer_events.clone(),
        ));

        Arc::new(Self {
            label: label.to_string(),
            open,
            buffered,
            low_water,
            peak_at_send: AtomicUsize::new(0),
            reject_sends: AtomicU32::new(0),
            outbound,
            own_events,
            peer_events,
            gate,
        })
    }

    /// Opens the pair and notifies both ends.
    pub async fn open(&self) {
        if self.open.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.own_events.send(ChannelEvent::Open).await;
        let _ = self.peer_events.send(ChannelEvent::Open).await;
    }

    /// Holds outbound messages in this end's buffer until resumed.
    pub fn pause_delivery(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume_delivery(&self) {
        self.gate.send_replace(true);
    }

    /// Makes the next `count` sends fail.
    pub fn reject_next_sends(&self, count: u32) {
        self.reject_sends.store(count, Ordering::SeqCst);
    }

    /// Largest buffered amount observed at the moment a send was accepted.
    pub fn peak_buffered_at_send(&self) -> usize {
        self.peak_at_send.load(Ordering::SeqCst)
    }
}

impl SubChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Payload) -> ChannelFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(ChannelError::NotOpen(self.label.clone()));
            }
            let rejected = self
                .reject_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if rejected {
                return Err(ChannelError::SendRejected {
                    label: self.label.clone(),
                    reason: "simulated rejection".into(),
                });
            }

            let before = self.buffered.fetch_add(payload.len(), Ordering::SeqCst);
            self.peak_at_send.fetch_max(before, Ordering::SeqCst);
            self.outbound
                .send(payload)
                .map_err(|_| ChannelError::NotOpen(self.label.clone()))
        })
    }

    fn buffered_amount(&self) -> ChannelFuture<'_, usize> {
        Box::pin(async move { self.buffered.load(Ordering::SeqCst) })
    }

    fn set_low_water_mark(&self, threshold: usize) -> ChannelFuture<'_, ()> {
        Box::pin(async move { self.low_water.store(threshold, Ordering::SeqCst) })
    }

    fn close(&self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            if !self.open.swap(false, Ordering::SeqCst) {
                return;
            }
            let _ = self.own_events.send(ChannelEvent::Closed).await;
            let _ = self.peer_events.send(ChannelEvent::Closed).await;
        })
    }
}

/// Moves one end's outbound queue to the other end's events.
async fn deliver(
    mut outbound_rx: mpsc::UnboundedReceiver<Payload>,
    mut gate_rx: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
    low_water: Arc<AtomicUsize>,
    own_events: mpsc::Sender<ChannelEvent>,
    peer_events: mpsc::Sender<ChannelEvent>,
) {
    while let Some(payload) = outbound_rx.recv().await {
        let gate_alive = gate_rx.wait_for(|enabled| *enabled).await.is_ok();
        if !gate_alive {
            break;
        }
        let len = payload.len();
        if open.load(Ordering::SeqCst)
            && peer_events
                .send(ChannelEvent::Message(payload))
                .await
                .is_err()
        {
            break;
        }

        let before = buffered.fetch_sub(len, Ordering::SeqCst);
        let after = before.saturating_sub(len);
        let low = low_water.load(Ordering::SeqCst);
        if before > low && after <= low {
            trace!(after, low, "loopback buffered amount low");
            let _ = own_events.send(ChannelEvent::BufferedAmountLow).await;
        }
    }
}
