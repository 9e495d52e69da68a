//! [`SubChannel`] over a WebRTC data channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use crate::channel::{ChannelEvent, ChannelFuture, Payload, SubChannel};
use crate::error::ChannelError;

const EVENT_CAPACITY: usize = 1024;

/// A WebRTC data channel with its callbacks routed into an event stream.
pub struct RtcSubChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
    events_tx: mpsc::Sender<ChannelEvent>,
}

impl RtcSubChannel {
    /// Registers open/close/message handlers on `dc` and returns the
    /// adapter with its event receiver. A channel that is already open
    /// reports [`ChannelEvent::Open`] immediately.
    pub fn attach(dc: Arc<RTCDataChannel>) -> (Arc<Self>, mpsc::Receiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let label = dc.label().to_string();

        let tx = events_tx.clone();
        let open_label = label.clone();
        dc.on_open(Box::new(move || {
            let tx = tx.clone();
            let label = open_label.clone();
            Box::pin(async move {
                debug!(channel = %label, "sub-channel open");
                let _ = tx.send(ChannelEvent::Open).await;
            })
        }));

        let tx = events_tx.clone();
        let close_label = label.clone();
        dc.on_close(Box::new(move || {
            let tx = tx.clone();
            let label = close_label.clone();
            Box::pin(async move {
                warn!(channel = %label, "sub-channel closed by transport");
                let _ = tx.send(ChannelEvent::Closed).await;
            })
        }));

        let tx = events_tx.clone();
        let msg_label = label.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            let label = msg_label.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    match String::from_utf8(msg.data.to_vec()) {
                        Ok(text) => Payload::Text(text),
                        Err(e) => {
                            warn!(channel = %label, "dropping non-UTF-8 text message: {e}");
                            return;
                        }
                    }
                } else {
                    Payload::Binary(msg.data)
                };
                let _ = tx.send(ChannelEvent::Message(payload)).await;
            })
        }));

        if dc.ready_state() == RTCDataChannelState::Open {
            let _ = events_tx.try_send(ChannelEvent::Open);
        }

        let channel = Arc::new(Self {
            dc,
            label,
            events_tx,
        });
        (channel, events_rx)
    }
}

impl SubChannel for RtcSubChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send(&self, payload: Payload) -> ChannelFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(ChannelError::NotOpen(self.label.clone()));
            }
            let result = match payload {
                Payload::Text(text) => self.dc.send_text(text).await,
                Payload::Binary(data) => self.dc.send(&data).await,
            };
            result.map(|_| ()).map_err(|e| ChannelError::SendRejected {
                label: self.label.clone(),
                reason: e.to_string(),
            })
        })
    }

    fn buffered_amount(&self) -> ChannelFuture<'_, usize> {
        Box::pin(async move { self.dc.buffered_amount().await })
    }

    fn set_low_water_mark(&self, threshold: usize) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            self.dc.set_buffered_amount_low_threshold(threshold).await;
            let tx = self.events_tx.clone();
            self.dc
                .on_buffered_amount_low(Box::new(move || {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(ChannelEvent::BufferedAmountLow).await;
                    })
                }))
                .await;
        })
    }

    fn close(&self) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.dc.close().await {
                debug!(channel = %self.label, "close failed: {e}");
            }
        })
    }
}

