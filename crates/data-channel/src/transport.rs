//! Duplex transport over the control and data sub-channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use peerdrop_protocol::constants::{DRAIN_FALLBACK_TIMEOUT, HEARTBEAT_INTERVAL};
use peerdrop_protocol::{ChunkFrame, ControlMessage};

use crate::channel::{ChannelEvent, Payload, SubChannel};
use crate::error::ChannelError;

const TRANSPORT_EVENT_CAPACITY: usize = 1024;

/// What the transport reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Both sub-channels are open.
    Open,
    /// A control message other than `ping`/`pong`.
    Control(ControlMessage),
    /// A decoded data frame.
    Chunk(ChunkFrame),
    /// A sub-channel closed; the transport is no longer usable.
    Closed { label: String },
}

/// Timing knobs, defaulted from protocol constants.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub low_water_mark: usize,
    pub heartbeat_interval: Duration,
    pub drain_fallback: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            low_water_mark: peerdrop_protocol::constants::DEFAULT_LOW_WATER_MARK,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            drain_fallback: DRAIN_FALLBACK_TIMEOUT,
        }
    }
}

struct Inner {
    control: Arc<dyn SubChannel>,
    data: Arc<dyn SubChannel>,
    drained: Notify,
    opened: AtomicBool,
    closed: AtomicBool,
    options: TransportOptions,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<TransportEvent>,
}

/// Control + data sub-channels behind one handle.
///
/// Cheap to clone. Events from both sub-channels are merged into the
/// receiver returned by [`ChannelTransport::new`]; each sub-channel is
/// handled by its own task, so control and data may interleave.
#[derive(Clone)]
pub struct ChannelTransport {
    inner: Arc<Inner>,
}

impl ChannelTransport {
    /// Wraps two sub-channels. Sets the low-water mark on the data channel
    /// and starts one event task per sub-channel.
    pub async fn new(
        control: Arc<dyn SubChannel>,
        control_events: mpsc::Receiver<ChannelEvent>,
        data: Arc<dyn SubChannel>,
        data_events: mpsc::Receiver<ChannelEvent>,
        options: TransportOptions,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        data.set_low_water_mark(options.low_water_mark).await;

        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let transport = Self {
            inner: Arc::new(Inner {
                control,
                data,
                drained: Notify::new(),
                opened: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                options,
                cancel: CancellationToken::new(),
                events_tx,
            }),
        };

        tokio::spawn(control_pump(transport.clone(), control_events));
        tokio::spawn(data_pump(transport.clone(), data_events));

        (transport, events_rx)
    }

    /// Both sub-channels are open.
    pub fn is_open(&self) -> bool {
        self.inner.control.is_open() && self.inner.data.is_open()
    }

    /// Sends a control message as JSON text.
    pub async fn send_control(&self, msg: &ControlMessage) -> Result<(), ChannelError> {
        self.ensure_open()?;
        let json = msg.to_json()?;
        trace!(kind = msg.kind(), "sending control message");
        self.inner.control.send(Payload::Text(json)).await
    }

    /// Sends one encoded data frame.
    pub async fn send_chunk(&self, frame: Bytes) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.inner.data.send(Payload::Binary(frame)).await
    }

    /// Bytes queued on the data sub-channel.
    pub async fn buffered_amount(&self) -> usize {
        self.inner.data.buffered_amount().await
    }

    /// Waits until the data sub-channel drains to the low-water mark.
    ///
    /// Returns immediately when already at or below the mark or when the
    /// channel is not open. Otherwise waits for the low-water event, or the
    /// fallback timeout if that event never fires.
    pub async fn wait_for_drain(&self) {
        if !self.inner.data.is_open() {
            return;
        }

        let notified = self.inner.drained.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let buffered = self.inner.data.buffered_amount().await;
        if buffered <= self.inner.options.low_water_mark {
            return;
        }

        tokio::select! {
            _ = &mut notified => trace!("data channel drained"),
            _ = tokio::time::sleep(self.inner.options.drain_fallback) => {
                debug!(buffered, "drain wait fell back to timeout");
            }
            _ = self.inner.cancel.cancelled() => {}
        }
    }

    /// Closes both sub-channels and stops the heartbeat.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.control.close().await;
        self.inner.data.close().await;
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if !self.inner.control.is_open() {
            return Err(ChannelError::NotOpen(self.inner.control.label().to_string()));
        }
        if !self.inner.data.is_open() {
            return Err(ChannelError::NotOpen(self.inner.data.label().to_string()));
        }
        Ok(())
    }

    async fn emit(&self, event: TransportEvent) {
        if self.inner.events_tx.send(event).await.is_err() {
            trace!("transport event receiver dropped");
        }
    }

    /// Emits [`TransportEvent::Open`] once both sides are open and starts
    /// the heartbeat.
    async fn maybe_opened(&self) {
        if !self.is_open() || self.inner.opened.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("channel transport open");
        tokio::spawn(crate::heartbeat::heartbeat_pump(
            self.inner.control.clone(),
            self.inner.options.heartbeat_interval,
            self.inner.cancel.child_token(),
        ));
        self.emit(TransportEvent::Open).await;
    }

    async fn closed(&self, label: &str) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(channel = label, "sub-channel closed, transport down");
        self.inner.cancel.cancel();
        self.inner.drained.notify_waiters();
        self.emit(TransportEvent::Closed {
            label: label.to_string(),
        })
        .await;
    }
}

async fn control_pump(transport: ChannelTransport, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Open => transport.maybe_opened().await,
            ChannelEvent::Closed => {
                let label = transport.inner.control.label().to_string();
                transport.closed(&label).await;
            }
            ChannelEvent::Message(Payload::Text(text)) => {
                let msg = match ControlMessage::from_json(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("dropping malformed control message: {e}");
                        continue;
                    }
                };
                match msg {
                    ControlMessage::Ping => {
                        if let Err(e) = transport.send_control(&ControlMessage::Pong).await {
                            debug!("pong not sent: {e}");
                        }
                    }
                    ControlMessage::Pong => trace!("heartbeat pong"),
                    other => transport.emit(TransportEvent::Control(other)).await,
                }
            }
            ChannelEvent::Message(Payload::Binary(data)) => {
                warn!(len = data.len(), "binary message on control channel, dropping");
            }
            ChannelEvent::BufferedAmountLow => {}
        }
    }
}

async fn data_pump(transport: ChannelTransport, mut events: mpsc::Receiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Open => transport.maybe_opened().await,
            ChannelEvent::Closed => {
                let label = transport.inner.data.label().to_string();
                transport.closed(&label).await;
            }
            ChannelEvent::Message(Payload::Binary(data)) => match ChunkFrame::decode(data) {
                Ok(frame) => transport.emit(TransportEvent::Chunk(frame)).await,
                Err(e) => warn!("dropping malformed data frame: {e}"),
            },
            ChannelEvent::Message(Payload::Text(_)) => {
                warn!("text message on data channel, dropping");
            }
            ChannelEvent::BufferedAmountLow => transport.inner.drained.notify_waiters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{self, LoopbackChannel};
    use peerdrop_protocol::frame;

    struct Side {
        transport: ChannelTransport,
        events: mpsc::Receiver<TransportEvent>,
        control: Arc<LoopbackChannel>,
        data: Arc<LoopbackChannel>,
    }

    async fn connected(options: TransportOptions) -> (Side, Side) {
        let ((ca, ca_rx), (cb, cb_rx)) = loopback::pair("control");
        let ((da, da_rx), (db, db_rx)) = loopback::pair("data");
        let (ta, ea) = ChannelTransport::new(ca.clone(), ca_rx, da.clone(), da_rx, options).await;
        let (tb, eb) = ChannelTransport::new(cb.clone(), cb_rx, db.clone(), db_rx, options).await;
        ca.open().await;
        da.open().await;
        let mut a = Side {
            transport: ta,
            events: ea,
            control: ca,
            data: da,
        };
        let mut b = Side {
            transport: tb,
            events: eb,
            control: cb,
            data: db,
        };
        assert_eq!(a.events.recv().await, Some(TransportEvent::Open));
        assert_eq!(b.events.recv().await, Some(TransportEvent::Open));
        (a, b)
    }

    #[tokio::test]
    async fn send_before_open_is_an_error() {
        let ((ca, ca_rx), _cb) = loopback::pair("control");
        let ((da, da_rx), _db) = loopback::pair("data");
        let (t, _events) =
            ChannelTransport::new(ca, ca_rx, da, da_rx, TransportOptions::default()).await;
        let err = t.send_control(&ControlMessage::FileAccept).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotOpen(label) if label == "control"));
        assert!(t.send_chunk(frame::encode(0, b"x")).await.is_err());
    }

    #[tokio::test]
    async fn control_and_chunks_flow() {
        let (a, mut b) = connected(TransportOptions::default()).await;

        a.transport
            .send_control(&ControlMessage::FileAccept)
            .await
            .unwrap();
        a.transport.send_chunk(frame::encode(3, b"abc")).await.unwrap();

        let mut got_control = false;
        let mut got_chunk = false;
        for _ in 0..2 {
            match b.events.recv().await.unwrap() {
                TransportEvent::Control(ControlMessage::FileAccept) => got_control = true,
                TransportEvent::Chunk(f) => {
                    assert_eq!(f.index, 3);
                    assert_eq!(&f.payload[..], b"abc");
                    got_chunk = true;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(got_control && got_chunk);
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_surfaced() {
        let ((ca, ca_rx), (cb, mut cb_rx)) = loopback::pair("control");
        let ((da, da_rx), _db) = loopback::pair("data");
        let (_t, mut events) =
            ChannelTransport::new(ca.clone(), ca_rx, da.clone(), da_rx, TransportOptions::default())
                .await;
        ca.open().await;
        da.open().await;
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(cb_rx.recv().await, Some(ChannelEvent::Open));

        cb.send(Payload::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            cb_rx.recv().await,
            Some(ChannelEvent::Message(Payload::Text(
                r#"{"type":"pong"}"#.into()
            )))
        );

        cb.send(Payload::Text(r#"{"type":"cancel"}"#.into()))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Control(ControlMessage::Cancel))
        );
    }

    #[tokio::test]
    async fn malformed_control_message_is_dropped() {
        let (a, mut b) = connected(TransportOptions::default()).await;
        a.control
            .send(Payload::Text(r#"{"type":"resume"}"#.into()))
            .await
            .unwrap();
        a.transport
            .send_control(&ControlMessage::FileReject)
            .await
            .unwrap();
        assert_eq!(
            b.events.recv().await,
            Some(TransportEvent::Control(ControlMessage::FileReject))
        );
    }

    #[tokio::test]
    async fn wait_for_drain_returns_immediately_when_low() {
        let (a, _b) = connected(TransportOptions::default()).await;
        tokio::time::timeout(Duration::from_millis(50), a.transport.wait_for_drain())
            .await
            .expect("should not wait");
    }

    #[tokio::test]
    async fn wait_for_drain_wakes_on_low_water() {
        let options = TransportOptions {
            low_water_mark: 8,
            drain_fallback: Duration::from_secs(30),
            ..Default::default()
        };
        let (a, _b) = connected(options).await;

        a.data.pause_delivery();
        a.transport
            .send_chunk(Bytes::from(vec![0u8; 64]))
            .await
            .unwrap();
        assert_eq!(a.transport.buffered_amount().await, 64);

        let transport = a.transport.clone();
        let waiter = tokio::spawn(async move { transport.wait_for_drain().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        a.data.resume_delivery();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("drained in time")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_drain_falls_back_to_timeout() {
        let options = TransportOptions {
            low_water_mark: 8,
            ..Default::default()
        };
        let (a, _b) = connected(options).await;

        a.data.pause_delivery();
        a.transport
            .send_chunk(Bytes::from(vec![0u8; 64]))
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        a.transport.wait_for_drain().await;
        assert!(start.elapsed() >= DRAIN_FALLBACK_TIMEOUT);
    }

    #[tokio::test]
    async fn closing_one_side_reports_closed() {
        let (a, mut b) = connected(TransportOptions::default()).await;
        a.data.close().await;
        assert_eq!(
            b.events.recv().await,
            Some(TransportEvent::Closed {
                label: "data".into()
            })
        );
        assert!(!b.transport.is_open());
        let err = b
            .transport
            .send_chunk(frame::encode(0, b"late"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotOpen(_)));
    }
}
