//! Relay keepalive.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use peerdrop_protocol::constants::RELAY_PING_PERIOD;

use super::ping_payload;

/// Queues a numbered ping every `RELAY_PING_PERIOD` so idle relays and
/// proxies keep the socket open. Stops with the link or the writer.
pub(crate) async fn ping_pump(write_tx: mpsc::Sender<Message>, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval_at(
        tokio::time::Instant::now() + RELAY_PING_PERIOD,
        RELAY_PING_PERIOD,
    );
    let mut seq: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {
                seq += 1;
                if write_tx.send(ping_payload(seq)).await.is_err() {
                    break;
                }
                trace!(seq, "relay ping queued");
            }
        }
    }
}
