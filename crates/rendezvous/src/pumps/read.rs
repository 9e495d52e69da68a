//! WebSocket read pump: parses relay envelopes and broadcasts them.

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use peerdrop_protocol::Envelope;
use peerdrop_protocol::constants::RELAY_MAX_MESSAGE_SIZE;

use crate::types::LinkEvent;

use super::{is_final, pong_seq};

/// How a read pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// The relay closed with code 1000. No reconnect.
    ClosedNormally,
    /// Stream error, abnormal close, or EOF. Reconnect.
    Lost,
    /// Local cancellation.
    Cancelled,
}

/// Reads frames from the relay until the stream ends or is cancelled.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events_tx: broadcast::Sender<LinkEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) -> ReadOutcome
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_text_message(text.as_str(), &events_tx);
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        debug!(?code, "relay sent close frame");
                        return if is_final(frame.as_ref()) {
                            ReadOutcome::ClosedNormally
                        } else {
                            ReadOutcome::Lost
                        };
                    }
                    Some(Ok(tungstenite::Message::Pong(data))) => {
                        trace!(seq = ?pong_seq(&data), "relay pong");
                    }
                    Some(Ok(_)) => {} // Binary, raw frames: ignored
                    Some(Err(e)) => {
                        warn!("relay read error: {e}");
                        return ReadOutcome::Lost;
                    }
                    None => {
                        debug!("relay stream ended");
                        return ReadOutcome::Lost;
                    }
                }
            }
        }
    }
}

/// Parses one text frame. Oversized or malformed envelopes are dropped.
pub(crate) fn handle_text_message(text: &str, events_tx: &broadcast::Sender<LinkEvent>) {
    if text.len() > RELAY_MAX_MESSAGE_SIZE {
        warn!("envelope too large ({} bytes), dropping", text.len());
        return;
    }

    let envelope = match Envelope::from_json(text) {
        Ok(e) => e,
        Err(e) => {
            warn!("failed to parse envelope: {e}");
            return;
        }
    };

    trace!(signal = envelope.signal.as_str(), "received envelope");
    if events_tx.send(LinkEvent::Envelope(envelope)).is_err() {
        trace!("no link subscribers, envelope dropped");
    }
}
