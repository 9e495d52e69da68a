//! Streams one file as indexed frames under backpressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use peerdrop_data_channel::ChannelTransport;
use peerdrop_protocol::{ControlMessage, TransferConfig};

use crate::TransferError;
use crate::chunked::FileSource;
use crate::progress::SpeedCalculator;
use crate::types::{SendEvent, TransferProgress};

/// Pause and abort switches for an outgoing transfer.
///
/// Cheap to clone; every clone controls the same transfer.
#[derive(Debug, Clone)]
pub struct SendControl {
    paused: Arc<watch::Sender<bool>>,
    abort: CancellationToken,
    by_peer: Arc<AtomicBool>,
}

impl Default for SendControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SendControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            abort: CancellationToken::new(),
            by_peer: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares the pause switch; aborting the result leaves `self` running,
    /// aborting `self` aborts the result.
    pub(crate) fn for_file(&self) -> Self {
        Self {
            paused: self.paused.clone(),
            abort: self.abort.child_token(),
            by_peer: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) async fn aborted(&self) {
        self.abort.cancelled().await
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Aborts because the peer sent `cancel`; no `cancel` goes back.
    pub(crate) fn abort_by_peer(&self) {
        if !self.abort.is_cancelled() {
            self.by_peer.store(true, Ordering::Release);
        }
        self.abort.cancel();
    }

    /// The error an aborted transfer ends with.
    fn abort_error(&self) -> TransferError {
        if self.by_peer.load(Ordering::Acquire) {
            TransferError::PeerCancelled
        } else {
            TransferError::Aborted
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Suspends while paused. Fails once aborted.
    async fn wait_if_paused(&self) -> Result<(), TransferError> {
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = self.abort.cancelled() => Err(self.abort_error()),
            result = paused.wait_for(|p| !*p) => {
                result.map(|_| ()).map_err(|_| self.abort_error())
            }
        }
    }

    fn check_aborted(&self) -> Result<(), TransferError> {
        if self.abort.is_cancelled() {
            return Err(self.abort_error());
        }
        Ok(())
    }
}

/// Sends files over the data sub-channel.
pub struct ChunkSender {
    transport: ChannelTransport,
    config: TransferConfig,
    control: SendControl,
    events: mpsc::Sender<SendEvent>,
}

impl ChunkSender {
    pub fn new(
        transport: ChannelTransport,
        config: TransferConfig,
        control: SendControl,
        events: mpsc::Sender<SendEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            control,
            events,
        }
    }

    pub fn control(&self) -> &SendControl {
        &self.control
    }

    /// Streams `source` and returns the number of payload bytes handed to
    /// the transport.
    ///
    /// Returns once the last frame is accepted locally; delivery is
    /// confirmed separately by the receiver's `file-complete`. A local
    /// abort sends `cancel` to the peer; a peer-initiated one does not.
    pub async fn send_file(&self, source: &FileSource) -> Result<u64, TransferError> {
        let result = self.stream(source).await;
        if matches!(result, Err(TransferError::Aborted)) {
            info!(file = %source.meta().name, "transfer aborted, notifying peer");
            if let Err(e) = self.transport.send_control(&ControlMessage::Cancel).await {
                debug!("cancel not delivered: {e}");
            }
        }
        result
    }

    async fn stream(&self, source: &FileSource) -> Result<u64, TransferError> {
        let meta = source.meta();
        let mut reader = source.open(self.config.chunk_size).await?;
        let mut speed = SpeedCalculator::default();
        let mut progress = TransferProgress::new(meta);
        speed.record(0);

        debug!(
            file = %meta.name,
            size = meta.size,
            chunks = meta.chunk_count(self.config.chunk_size),
            "sending file"
        );

        loop {
            self.control.wait_if_paused().await?;
            self.control.check_aborted()?;

            let Some(frame) = reader.next_chunk().await? else {
                break;
            };
            let encoded = frame.encode();

            self.wait_below_high_water().await?;

            if let Err(e) = self.transport.send_chunk(encoded.clone()).await {
                debug!(index = frame.index, "send rejected, retrying after drain: {e}");
                self.drain().await?;
                if let Err(e) = self.transport.send_chunk(encoded).await {
                    warn!(index = frame.index, "send rejected twice: {e}");
                    return Err(TransferError::SendFailed {
                        index: frame.index,
                        reason: e.to_string(),
                    });
                }
            }

            progress.bytes += frame.payload.len() as u64;
            trace!(index = frame.index, sent = progress.bytes, "chunk sent");
            if speed.record(progress.bytes) {
                progress.bytes_per_second = speed.bytes_per_second();
                progress.eta = speed.eta(progress.total - progress.bytes);
                self.emit(SendEvent::Progress(progress.clone())).await;
            }
        }

        progress.eta = None;
        self.emit(SendEvent::Progress(progress.clone())).await;
        info!(file = %meta.name, bytes = progress.bytes, "all chunks handed to transport");
        Ok(progress.bytes)
    }

    /// Loops until the data channel buffers no more than the high-water
    /// mark.
    async fn wait_below_high_water(&self) -> Result<(), TransferError> {
        loop {
            if !self.transport.is_open() {
                return Err(TransferError::ChannelClosed);
            }
            let buffered = self.transport.buffered_amount().await;
            if buffered <= self.config.high_water_mark {
                return Ok(());
            }
            trace!(buffered, high = self.config.high_water_mark, "above high water mark");
            self.drain().await?;
        }
    }

    async fn drain(&self) -> Result<(), TransferError> {
        tokio::select! {
            _ = self.control.aborted() => Err(self.control.abort_error()),
            _ = self.transport.wait_for_drain() => Ok(()),
        }
    }

    async fn emit(&self, event: SendEvent) {
        if self.events.send(event).await.is_err() {
            trace!("send event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use peerdrop_data_channel::{LoopbackLink, TransportEvent, TransportOptions};

    fn small_config() -> TransferConfig {
        TransferConfig {
            chunk_size: 400,
            high_water_mark: 1000,
            low_water_mark: 200,
        }
    }

    async fn link(config: &TransferConfig) -> LoopbackLink {
        let mut link = LoopbackLink::open(TransportOptions {
            low_water_mark: config.low_water_mark,
            ..Default::default()
        })
        .await;
        assert_eq!(link.local_events.recv().await, Some(TransportEvent::Open));
        assert_eq!(link.remote_events.recv().await, Some(TransportEvent::Open));
        link
    }

    async fn collect_chunks(
        events: &mut mpsc::Receiver<TransportEvent>,
        count: usize,
    ) -> Vec<peerdrop_protocol::ChunkFrame> {
        let mut frames = Vec::new();
        while frames.len() < count {
            match events.recv().await {
                Some(TransportEvent::Chunk(frame)) => frames.push(frame),
                Some(_) => {}
                None => break,
            }
        }
        frames
    }

    #[tokio::test]
    async fn sends_consecutive_indices() {
        let config = small_config();
        let mut link = link(&config).await;
        let (events_tx, mut events_rx) = mpsc::channel(64);
        let sender = ChunkSender::new(link.local.clone(), config, SendControl::new(), events_tx);

        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let source = FileSource::from_bytes("a.bin", data.clone());
        let sent = sender.send_file(&source).await.unwrap();
        assert_eq!(sent, 1000);

        let frames = collect_chunks(&mut link.remote_events, 3).await;
        let indices: Vec<u32> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, [0, 1, 2]);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.payload.to_vec()).collect();
        assert_eq!(joined, data);

        let mut last = None;
        while let Ok(event) = events_rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(SendEvent::Progress(p)) => assert_eq!(p.percent(), 100.0),
            other => panic!("expected final progress, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_sends_above_high_water_mark() {
        let config = small_config();
        let mut link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let sender = ChunkSender::new(link.local.clone(), config, SendControl::new(), events_tx);

        link.local_data.pause_delivery();
        let source = FileSource::from_bytes("big.bin", vec![1u8; 8000]);
        let task = tokio::spawn(async move { sender.send_file(&source).await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!task.is_finished());
        assert!(link.local.buffered_amount().await > config.high_water_mark);

        link.local_data.resume_delivery();
        assert_eq!(task.await.unwrap().unwrap(), 8000);
        assert!(link.local_data.peak_buffered_at_send() <= config.high_water_mark);

        let frames = collect_chunks(&mut link.remote_events, 20).await;
        assert_eq!(frames.len(), 20);
    }

    #[tokio::test]
    async fn retries_a_rejected_send_once() {
        let config = small_config();
        let mut link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let sender = ChunkSender::new(link.local.clone(), config, SendControl::new(), events_tx);

        link.local_data.reject_next_sends(1);
        let source = FileSource::from_bytes("a.bin", vec![9u8; 10]);
        assert_eq!(sender.send_file(&source).await.unwrap(), 10);
        let frames = collect_chunks(&mut link.remote_events, 1).await;
        assert_eq!(frames[0].payload, Bytes::from(vec![9u8; 10]));
    }

    #[tokio::test]
    async fn fails_after_second_rejection() {
        let config = small_config();
        let link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let sender = ChunkSender::new(link.local.clone(), config, SendControl::new(), events_tx);

        link.local_data.reject_next_sends(2);
        let source = FileSource::from_bytes("a.bin", vec![9u8; 10]);
        assert!(matches!(
            sender.send_file(&source).await,
            Err(TransferError::SendFailed { index: 0, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_and_abort_sends_cancel() {
        let config = small_config();
        let mut link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let control = SendControl::new();
        let sender = ChunkSender::new(link.local.clone(), config, control.clone(), events_tx);

        control.pause();
        let source = FileSource::from_bytes("a.bin", vec![0u8; 4000]);
        let task = tokio::spawn(async move { sender.send_file(&source).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());
        assert_eq!(link.local.buffered_amount().await, 0);

        control.abort();
        assert!(matches!(task.await.unwrap(), Err(TransferError::Aborted)));
        loop {
            match link.remote_events.recv().await {
                Some(TransportEvent::Control(ControlMessage::Cancel)) => break,
                Some(TransportEvent::Chunk(_)) => panic!("no chunk expected while paused"),
                Some(_) => {}
                None => panic!("transport closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn peer_abort_sends_nothing_back() {
        let config = small_config();
        let mut link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let control = SendControl::new();
        let sender = ChunkSender::new(link.local.clone(), config, control.clone(), events_tx);

        control.pause();
        let source = FileSource::from_bytes("a.bin", vec![0u8; 4000]);
        let task = tokio::spawn(async move { sender.send_file(&source).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        control.abort_by_peer();
        assert!(matches!(task.await.unwrap(), Err(TransferError::PeerCancelled)));
        let quiet = tokio::time::timeout(Duration::from_secs(2), link.remote_events.recv()).await;
        assert!(quiet.is_err(), "unexpected message: {quiet:?}");
    }

    #[tokio::test]
    async fn empty_file_completes_without_frames() {
        let config = small_config();
        let link = link(&config).await;
        let (events_tx, _events_rx) = mpsc::channel(64);
        let sender = ChunkSender::new(link.local.clone(), config, SendControl::new(), events_tx);
        let source = FileSource::from_bytes("empty.txt", Bytes::new());
        assert_eq!(sender.send_file(&source).await.unwrap(), 0);
        assert_eq!(link.local.buffered_amount().await, 0);
    }
}
