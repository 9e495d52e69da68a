//! Sequential queue of outgoing files.
//!
//! Each file runs the full handshake: `file-request`, wait for
//! `file-accept` / `file-reject`, stream the chunks, then wait for the
//! receiver's `file-complete`. The next file starts only after that and a
//! short settling delay.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use peerdrop_data_channel::ChannelTransport;
use peerdrop_protocol::constants::QUEUE_SETTLE_DELAY;
use peerdrop_protocol::{ControlMessage, FileMeta, TransferConfig};

use crate::TransferError;
use crate::chunked::FileSource;
use crate::sender::{ChunkSender, SendControl};
use crate::types::{SendEvent, SendOutcome};

/// Handle to a running send queue.
pub struct QueueHandle {
    files_tx: mpsc::UnboundedSender<FileSource>,
    replies_tx: mpsc::UnboundedSender<ControlMessage>,
    control: SendControl,
    task: JoinHandle<()>,
}

impl QueueHandle {
    /// Appends a file. Returns `false` once the queue has stopped.
    pub fn enqueue(&self, source: FileSource) -> bool {
        self.files_tx.send(source).is_ok()
    }

    /// Routes a control message from the receiving peer into the queue.
    pub fn deliver(&self, msg: ControlMessage) {
        if self.replies_tx.send(msg).is_err() {
            trace!("send queue stopped, dropping reply");
        }
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Aborts the current file and drops everything still queued.
    pub fn cancel(&self) {
        self.control.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for QueueHandle {
    fn drop(&mut self) {
        self.control.abort();
    }
}

/// Task state of a send queue.
pub struct SendQueue {
    transport: ChannelTransport,
    config: TransferConfig,
    control: SendControl,
    files_rx: mpsc::UnboundedReceiver<FileSource>,
    replies_rx: mpsc::UnboundedReceiver<ControlMessage>,
    events: mpsc::Sender<SendEvent>,
    settle_delay: Duration,
    last_finished: Option<Instant>,
}

impl SendQueue {
    /// Starts an empty queue on its own task.
    pub fn spawn(
        transport: ChannelTransport,
        config: TransferConfig,
        events: mpsc::Sender<SendEvent>,
    ) -> QueueHandle {
        let (files_tx, files_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let control = SendControl::new();

        let queue = Self {
            transport,
            config,
            control: control.clone(),
            files_rx,
            replies_rx,
            events,
            settle_delay: QUEUE_SETTLE_DELAY,
            last_finished: None,
        };
        let task = tokio::spawn(queue.run());

        QueueHandle {
            files_tx,
            replies_tx,
            control,
            task,
        }
    }

    async fn run(mut self) {
        let mut pending = VecDeque::new();
        loop {
            let source = match pending.pop_front() {
                Some(source) => source,
                None => tokio::select! {
                    _ = self.control.aborted() => break,
                    source = self.files_rx.recv() => match source {
                        Some(source) => source,
                        None => break,
                    },
                },
            };

            let meta = source.meta().clone();
            let outcome = self.send_one(&source).await;
            info!(file = %meta.name, ?outcome, "outgoing file finished");
            self.emit(SendEvent::Finished { meta, outcome }).await;
            self.last_finished = Some(Instant::now());

            if self.control.is_aborted() {
                break;
            }
            while let Ok(next) = self.files_rx.try_recv() {
                pending.push_back(next);
            }
            if pending.is_empty() {
                self.emit(SendEvent::QueueDrained).await;
            }
        }

        // Anything still queued after a cancel is reported, not sent.
        self.files_rx.close();
        while let Ok(next) = self.files_rx.try_recv() {
            pending.push_back(next);
        }
        if !pending.is_empty() {
            for source in pending {
                self.emit(SendEvent::Finished {
                    meta: source.meta().clone(),
                    outcome: SendOutcome::Cancelled,
                })
                .await;
            }
            self.emit(SendEvent::QueueDrained).await;
        }
        debug!("send queue stopped");
    }

    async fn send_one(&mut self, source: &FileSource) -> SendOutcome {
        if let Some(at) = self.last_finished {
            tokio::time::sleep_until(at + self.settle_delay).await;
        }
        while let Ok(stale) = self.replies_rx.try_recv() {
            trace!(kind = stale.kind(), "discarding stale reply");
        }

        let meta = source.meta().clone();
        let control = self.control.for_file();

        match self.offer(&meta, &control).await {
            Ok(true) => {}
            Ok(false) => return SendOutcome::Rejected,
            Err(e) => return outcome_of(e),
        }
        self.emit(SendEvent::Started(meta.clone())).await;

        let sender = ChunkSender::new(
            self.transport.clone(),
            self.config,
            control.clone(),
            self.events.clone(),
        );
        let mut confirmed = None;
        let sent = {
            let send = sender.send_file(source);
            tokio::pin!(send);
            loop {
                tokio::select! {
                    result = &mut send => break result,
                    reply = self.replies_rx.recv() => match reply {
                        Some(ControlMessage::Ack { bytes_received, .. }) => {
                            self.emit(SendEvent::Acked { bytes_received }).await;
                        }
                        Some(ControlMessage::FileComplete { bytes_received }) => {
                            confirmed = Some(bytes_received);
                        }
                        Some(ControlMessage::Cancel) => {
                            info!(file = %meta.name, "receiver cancelled");
                            control.abort_by_peer();
                        }
                        Some(other) => trace!(kind = other.kind(), "ignoring reply while sending"),
                        None => control.abort(),
                    },
                }
            }
        };

        let bytes_sent = match sent {
            Ok(bytes) => bytes,
            Err(e) => return outcome_of(e),
        };

        let bytes_received = match confirmed {
            Some(bytes) => bytes,
            None => match self.await_confirmation(&meta, &control).await {
                Ok(bytes) => bytes,
                Err(e) => return outcome_of(e),
            },
        };

        if bytes_received != meta.size {
            warn!(
                file = %meta.name,
                bytes_sent,
                bytes_received,
                expected = meta.size,
                "receiver confirmed a different size"
            );
            return SendOutcome::Failed(
                TransferError::SizeMismatch {
                    expected: meta.size,
                    actual: bytes_received,
                }
                .to_string(),
            );
        }
        SendOutcome::Delivered {
            bytes: bytes_received,
        }
    }

    /// Sends `file-request` and waits for the decision. `Ok(false)` is a
    /// rejection.
    async fn offer(&mut self, meta: &FileMeta, control: &SendControl) -> Result<bool, TransferError> {
        self.transport
            .send_control(&ControlMessage::file_request(meta))
            .await?;
        self.emit(SendEvent::Offered(meta.clone())).await;
        debug!(file = %meta.name, "file offered, awaiting decision");

        loop {
            let reply = tokio::select! {
                _ = control.aborted() => return Err(self.withdraw(meta).await),
                reply = self.replies_rx.recv() => reply,
            };
            match reply {
                Some(ControlMessage::FileAccept) => return Ok(true),
                Some(ControlMessage::FileReject) => {
                    info!(file = %meta.name, "receiver rejected file");
                    return Ok(false);
                }
                Some(ControlMessage::Cancel) => return Err(TransferError::PeerCancelled),
                Some(other) => trace!(kind = other.kind(), "ignoring reply while offering"),
                None => return Err(TransferError::ChannelClosed),
            }
        }
    }

    /// Waits for the receiver's `file-complete`.
    async fn await_confirmation(
        &mut self,
        meta: &FileMeta,
        control: &SendControl,
    ) -> Result<u64, TransferError> {
        loop {
            let reply = tokio::select! {
                _ = control.aborted() => return Err(self.withdraw(meta).await),
                reply = self.replies_rx.recv() => reply,
            };
            match reply {
                Some(ControlMessage::FileComplete { bytes_received }) => return Ok(bytes_received),
                Some(ControlMessage::Ack { bytes_received, .. }) => {
                    self.emit(SendEvent::Acked { bytes_received }).await;
                }
                Some(ControlMessage::Cancel) => return Err(TransferError::PeerCancelled),
                Some(other) => trace!(kind = other.kind(), "ignoring reply while confirming"),
                None => return Err(TransferError::ChannelClosed),
            }
        }
    }

    /// Tells the peer a file it was offered or is receiving is off.
    async fn withdraw(&self, meta: &FileMeta) -> TransferError {
        info!(file = %meta.name, "transfer aborted, notifying peer");
        if let Err(e) = self.transport.send_control(&ControlMessage::Cancel).await {
            debug!("cancel not delivered: {e}");
        }
        TransferError::Aborted
    }

    async fn emit(&self, event: SendEvent) {
        if self.events.send(event).await.is_err() {
            trace!("send event receiver dropped");
        }
    }
}

fn outcome_of(error: TransferError) -> SendOutcome {
    match error {
        TransferError::Aborted | TransferError::PeerCancelled => SendOutcome::Cancelled,
        other => SendOutcome::Failed(other.to_string()),
    }
}
