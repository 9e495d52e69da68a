//! Dual sub-channel transport.
//!
//! A peer link carries two ordered, reliable sub-channels: `control` for
//! small JSON [`peerdrop_protocol::ControlMessage`]s and `data` for binary
//! chunk frames. [`ChannelTransport`] merges them behind one handle with a
//! heartbeat, ping auto-reply and drain waiting for backpressure.
//!
//! The [`SubChannel`] seam has a WebRTC implementation ([`rtc`]) and an
//! in-process one ([`loopback`]).

pub mod channel;
pub mod error;
mod heartbeat;
pub mod loopback;
pub mod rtc;
pub mod transport;

pub use channel::{ChannelEvent, ChannelFuture, Payload, SubChannel};
pub use error::ChannelError;
pub use rtc::RtcSubChannel;
pub use transport::{ChannelTransport, TransportEvent, TransportOptions};

use std::sync::Arc;

use tokio::sync::mpsc;

use peerdrop_protocol::constants::{CONTROL_CHANNEL_LABEL, DATA_CHANNEL_LABEL};

/// Two transports joined by loopback sub-channels, already open.
///
/// Handy for local transfers and tests; the raw channel ends are exposed
/// so callers can pause delivery or inject failures.
pub struct LoopbackLink {
    pub local: ChannelTransport,
    pub local_events: mpsc::Receiver<TransportEvent>,
    pub remote: ChannelTransport,
    pub remote_events: mpsc::Receiver<TransportEvent>,
    pub local_data: Arc<loopback::LoopbackChannel>,
    pub remote_data: Arc<loopback::LoopbackChannel>,
}

impl LoopbackLink {
    /// Builds both transports and opens the sub-channels. The `Open` events
    /// are left in the receivers.
    pub async fn open(options: TransportOptions) -> Self {
        let ((lc, lc_rx), (rc, rc_rx)) = loopback::pair(CONTROL_CHANNEL_LABEL);
        let ((ld, ld_rx), (rd, rd_rx)) = loopback::pair(DATA_CHANNEL_LABEL);

        let (local, local_events) =
            ChannelTransport::new(lc.clone(), lc_rx, ld.clone(), ld_rx, options).await;
        let (remote, remote_events) =
            ChannelTransport::new(rc, rc_rx, rd.clone(), rd_rx, options).await;

        lc.open().await;
        ld.open().await;

        Self {
            local,
            local_events,
            remote,
            remote_events,
            local_data: ld,
            remote_data: rd,
        }
    }
}
