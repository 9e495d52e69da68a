//! Incoming file reassembly.
//!
//! Frames are checked for consecutive indices, then spooled through a
//! bounded queue to a background task that persists them in a
//! [`ChunkStore`]. Once the announced size has arrived the spool is
//! drained, the chunks are read back in order and the store is cleaned up.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use peerdrop_data_channel::ChannelTransport;
use peerdrop_protocol::constants::ACK_EVERY_CHUNKS;
use peerdrop_protocol::{ChunkFrame, ControlMessage, FileMeta};

use crate::TransferError;
use crate::chunked::checksum_bytes;
use crate::progress::SpeedCalculator;
use crate::store::ChunkStore;
use crate::types::{ReceiveState, ReceivedFile, TransferProgress};

/// In-memory chunks waiting for the store.
const SPOOL_CAPACITY: usize = 64;

/// What a data frame did to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Not receiving; the frame was dropped.
    Ignored,
    Buffered,
    /// Buffered, and a new speed sample is available.
    Progress(TransferProgress),
    Complete(ReceivedFile),
}

struct Incoming {
    meta: FileMeta,
    key: String,
    next_index: u32,
    progress: TransferProgress,
    speed: SpeedCalculator,
    spool: Option<mpsc::Sender<(u32, Bytes)>>,
    drain: Option<JoinHandle<Result<u32, TransferError>>>,
}

impl Incoming {
    /// Closes the spool and waits for the drain task.
    async fn finish_drain(&mut self) -> Result<u32, TransferError> {
        self.spool = None;
        match self.drain.take() {
            Some(handle) => handle
                .await
                .map_err(|e| TransferError::Store(format!("drain task: {e}")))?,
            None => Ok(0),
        }
    }
}

pub struct ChunkReceiver {
    transport: ChannelTransport,
    store: Arc<dyn ChunkStore>,
    state: ReceiveState,
    incoming: Option<Incoming>,
}

impl ChunkReceiver {
    pub fn new(transport: ChannelTransport, store: Arc<dyn ChunkStore>) -> Self {
        Self {
            transport,
            store,
            state: ReceiveState::Idle,
            incoming: None,
        }
    }

    pub fn state(&self) -> &ReceiveState {
        &self.state
    }

    /// Metadata of the file being offered or received.
    pub fn meta(&self) -> Option<&FileMeta> {
        self.incoming.as_ref().map(|i| &i.meta)
    }

    pub fn progress(&self) -> Option<&TransferProgress> {
        self.incoming.as_ref().map(|i| &i.progress)
    }

    /// Takes a `file-request`. While another file is in flight the request
    /// is refused with `file-reject`.
    pub async fn on_file_request(&mut self, meta: FileMeta) -> Result<(), TransferError> {
        if !self.state.is_terminal() {
            warn!(file = %meta.name, state = %self.state, "busy, rejecting file request");
            self.transport.send_control(&ControlMessage::FileReject).await?;
            return Err(TransferError::InvalidState {
                op: "file-request",
                state: self.state.to_string(),
            });
        }

        info!(file = %meta.name, size = meta.size, mime = %meta.mime_type, "file offered");
        self.incoming = Some(Incoming {
            key: meta.name.clone(),
            progress: TransferProgress::new(&meta),
            meta,
            next_index: 0,
            speed: SpeedCalculator::default(),
            spool: None,
            drain: None,
        });
        self.state = ReceiveState::Offering;
        Ok(())
    }

    /// Accepts the offered file. An empty file completes immediately.
    pub async fn accept(&mut self) -> Result<Option<ReceivedFile>, TransferError> {
        self.expect_state(ReceiveState::Offering, "accept")?;
        let Some(incoming) = self.incoming.as_mut() else {
            return Err(self.invalid("accept"));
        };

        // Leftovers from an earlier run under the same key.
        if let Err(e) = self.store.delete_file(&incoming.key).await {
            return Err(self.fail(e, false).await);
        }

        let (spool, rx) = mpsc::channel(SPOOL_CAPACITY);
        incoming.drain = Some(tokio::spawn(spool_to_store(
            self.store.clone(),
            incoming.key.clone(),
            rx,
        )));
        incoming.spool = Some(spool);
        incoming.speed.record(0);
        let empty = incoming.meta.size == 0;
        debug!(file = %incoming.meta.name, "accepted");

        self.state = ReceiveState::Receiving;
        self.transport.send_control(&ControlMessage::FileAccept).await?;

        if empty {
            return self.finalize().await;
        }
        Ok(None)
    }

    /// Declines the offered file. Nothing is written to the store.
    pub async fn reject(&mut self) -> Result<(), TransferError> {
        self.expect_state(ReceiveState::Offering, "reject")?;
        if let Some(incoming) = self.incoming.take() {
            info!(file = %incoming.meta.name, "file rejected");
        }
        self.state = ReceiveState::Idle;
        self.transport.send_control(&ControlMessage::FileReject).await?;
        Ok(())
    }

    /// Handles one data frame.
    pub async fn on_chunk(&mut self, frame: ChunkFrame) -> Result<ChunkOutcome, TransferError> {
        if self.state != ReceiveState::Receiving {
            trace!(index = frame.index, state = %self.state, "dropping frame");
            return Ok(ChunkOutcome::Ignored);
        }
        let Some(incoming) = self.incoming.as_mut() else {
            return Ok(ChunkOutcome::Ignored);
        };

        if frame.index != incoming.next_index {
            let err = TransferError::IndexGap {
                expected: incoming.next_index,
                got: frame.index,
            };
            return Err(self.fail(err, true).await);
        }
        let received = incoming.progress.bytes + frame.payload.len() as u64;
        if received > incoming.meta.size {
            let err = TransferError::Overshoot {
                expected: incoming.meta.size,
                received,
            };
            return Err(self.fail(err, true).await);
        }

        let spooled = match &incoming.spool {
            Some(spool) => spool.send((frame.index, frame.payload)).await.is_ok(),
            None => false,
        };
        if !spooled {
            let err = match incoming.finish_drain().await {
                Err(e) => e,
                Ok(_) => TransferError::Store("spool closed".into()),
            };
            return Err(self.fail(err, true).await);
        }

        incoming.next_index += 1;
        incoming.progress.bytes = received;
        let chunks = incoming.next_index;

        if chunks % ACK_EVERY_CHUNKS == 0 {
            let ack = ControlMessage::Ack {
                chunk_index: frame.index,
                bytes_received: received,
            };
            if let Err(e) = self.transport.send_control(&ack).await {
                debug!("ack not sent: {e}");
            }
        }

        if received == incoming.meta.size {
            return match self.finalize().await? {
                Some(file) => Ok(ChunkOutcome::Complete(file)),
                None => Ok(ChunkOutcome::Buffered),
            };
        }

        if incoming.speed.record(received) {
            incoming.progress.bytes_per_second = incoming.speed.bytes_per_second();
            incoming.progress.eta = incoming.speed.eta(incoming.meta.size - received);
            return Ok(ChunkOutcome::Progress(incoming.progress.clone()));
        }
        Ok(ChunkOutcome::Buffered)
    }

    /// Reassembles the file once every byte has arrived.
    ///
    /// Returns `Ok(None)` when the file was already finalized. A verified
    /// file is returned even if `file-complete` cannot be sent.
    pub async fn finalize(&mut self) -> Result<Option<ReceivedFile>, TransferError> {
        if self.state == ReceiveState::Complete {
            return Ok(None);
        }
        self.expect_state(ReceiveState::Receiving, "finalize")?;
        let Some(incoming) = self.incoming.as_mut() else {
            return Err(self.invalid("finalize"));
        };
        if incoming.progress.bytes < incoming.meta.size {
            return Err(self.invalid("finalize"));
        }

        self.state = ReceiveState::Finalizing;
        debug!(file = %incoming.meta.name, chunks = incoming.next_index, "finalizing");

        let assembled = match reassemble(self.store.as_ref(), incoming).await {
            Ok(data) => data,
            Err(e) => return Err(self.fail(e, true).await),
        };
        if let Err(e) = self.store.delete_file(&incoming.key).await {
            return Err(self.fail(e, true).await);
        }

        let bytes_received = incoming.progress.bytes;
        let file = ReceivedFile {
            sha256: checksum_bytes(&assembled),
            meta: incoming.meta.clone(),
            data: assembled,
        };
        self.state = ReceiveState::Complete;
        info!(file = %file.meta.name, bytes = bytes_received, sha256 = %file.sha256, "file received");

        // The file is already verified; a closed channel surfaces separately.
        if let Err(e) = self
            .transport
            .send_control(&ControlMessage::FileComplete { bytes_received })
            .await
        {
            warn!(file = %file.meta.name, "file-complete not sent: {e}");
        }
        Ok(Some(file))
    }

    /// The peer sent `cancel`. Returns `true` if a transfer was affected.
    pub async fn on_cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.fail(TransferError::PeerCancelled, false).await;
        true
    }

    /// Cancels locally and tells the peer.
    pub async fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.fail(TransferError::Aborted, true).await;
        true
    }

    /// The transport went away under a transfer.
    pub async fn on_transport_closed(&mut self) {
        if !self.state.is_terminal() {
            self.fail(TransferError::ChannelClosed, false).await;
        }
    }

    /// Moves to `Error`, discards persisted chunks and optionally sends
    /// `cancel`. Returns the error for propagation.
    async fn fail(&mut self, err: TransferError, notify_peer: bool) -> TransferError {
        warn!(state = %self.state, "incoming transfer failed: {err}");
        self.state = ReceiveState::Error(err.to_string());

        if let Some(mut incoming) = self.incoming.take() {
            if let Err(e) = incoming.finish_drain().await {
                debug!("spool drain during cleanup: {e}");
            }
            if let Err(e) = self.store.delete_file(&incoming.key).await {
                warn!(file = %incoming.meta.name, "cleanup failed: {e}");
            }
        }

        if notify_peer {
            if let Err(e) = self.transport.send_control(&ControlMessage::Cancel).await {
                debug!("cancel not sent: {e}");
            }
        }
        err
    }

    fn expect_state(&self, expected: ReceiveState, op: &'static str) -> Result<(), TransferError> {
        if self.state != expected {
            return Err(self.invalid(op));
        }
        Ok(())
    }

    fn invalid(&self, op: &'static str) -> TransferError {
        TransferError::InvalidState {
            op,
            state: self.state.to_string(),
        }
    }
}

async fn spool_to_store(
    store: Arc<dyn ChunkStore>,
    key: String,
    mut rx: mpsc::Receiver<(u32, Bytes)>,
) -> Result<u32, TransferError> {
    let mut written = 0;
    while let Some((index, data)) = rx.recv().await {
        store.put(&key, index, data).await?;
        written += 1;
    }
    Ok(written)
}

async fn reassemble(store: &dyn ChunkStore, incoming: &mut Incoming) -> Result<Bytes, TransferError> {
    let written = incoming.finish_drain().await?;
    if written != incoming.next_index {
        return Err(TransferError::Store(format!(
            "{written} of {} chunks persisted",
            incoming.next_index
        )));
    }

    let mut data = BytesMut::with_capacity(incoming.meta.size as usize);
    for index in 0..incoming.next_index {
        data.extend_from_slice(&store.get(&incoming.key, index).await?);
    }
    if data.len() as u64 != incoming.meta.size {
        return Err(TransferError::SizeMismatch {
            expected: incoming.meta.size,
            actual: data.len() as u64,
        });
    }
    Ok(data.freeze())
}
