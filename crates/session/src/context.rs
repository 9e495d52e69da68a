use tokio::sync::mpsc;

use peerdrop_data_channel::{ChannelTransport, TransportEvent};
use peerdrop_protocol::{PeerRole, RoomCode};
use peerdrop_transfer::{ChunkReceiver, FileSource, QueueHandle, SendEvent};

/// Everything one session owns. Only the controller task touches it.
#[derive(Default)]
pub struct SessionContext {
    pub room: Option<RoomCode>,
    pub role: Option<PeerRole>,
    pub transport: Option<ChannelTransport>,
    pub transport_events: Option<mpsc::Receiver<TransportEvent>>,
    pub receiver: Option<ChunkReceiver>,
    pub queue: Option<QueueHandle>,
    pub send_events: Option<mpsc::Receiver<SendEvent>>,
    /// Files waiting for the channels to open.
    pub pending_files: Vec<FileSource>,
    pub paused: bool,
}

impl SessionContext {
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(ChannelTransport::is_open)
    }

    /// A queue that can still take files.
    pub fn live_queue(&self) -> Option<&QueueHandle> {
        self.queue.as_ref().filter(|q| !q.is_finished())
    }
}
