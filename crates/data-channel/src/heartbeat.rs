//! Control-channel heartbeat: a `ping` every few seconds while open.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use peerdrop_protocol::ControlMessage;

use crate::channel::{Payload, SubChannel};

/// Sends `ping` on `control` every `period` until cancelled or a send
/// fails. No liveness timeout is derived from the replies.
pub(crate) async fn heartbeat_pump(
    control: Arc<dyn SubChannel>,
    period: Duration,
    cancel: CancellationToken,
) {
    let ping = match ControlMessage::Ping.to_json() {
        Ok(json) => json,
        Err(e) => {
            debug!("cannot encode ping: {e}");
            return;
        }
    };

    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = control.send(Payload::Text(ping.clone())).await {
                    debug!("heartbeat stopped: {e}");
                    break;
                }
                trace!("heartbeat ping sent");
            }
        }
    }
}
