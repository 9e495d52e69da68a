//! Relay write pump. The only task that touches the socket's sink.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::leaving;

/// Drains `queue` into the socket. On cancellation, or once every sender
/// is gone, says goodbye with a final close frame; after a failed write
/// the socket is abandoned as is.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let mut written: u64 = 0;
    let healthy = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break true,
            next = queue.recv() => next,
        };
        let Some(msg) = next else { break true };
        if let Err(e) = sink.send(msg).await {
            warn!(written, "relay write failed: {e}");
            break false;
        }
        written += 1;
    };

    if healthy {
        if let Err(e) = sink.send(leaving()).await {
            debug!("close frame not sent: {e}");
        }
    }
    debug!(written, "relay write pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    use crate::pumps::is_final;

    /// A sink that forwards into a channel and fails once `fail_after`
    /// messages went through.
    fn recording_sink(
        tx: mpsc::UnboundedSender<Message>,
        fail_after: usize,
    ) -> std::pin::Pin<Box<impl SinkExt<Message, Error = tungstenite::Error>>> {
        Box::pin(sink::unfold((tx, 0usize), move |(tx, n), msg: Message| async move {
            if n >= fail_after {
                return Err(tungstenite::Error::ConnectionClosed);
            }
            let _ = tx.send(msg);
            Ok((tx, n + 1))
        }))
    }

    #[tokio::test]
    async fn forwards_in_order_then_says_goodbye() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(write_pump(recording_sink(out_tx, usize::MAX), queue_rx, cancel.clone()));

        for text in ["join", "offer"] {
            queue_tx.send(Message::Text(text.to_string().into())).await.unwrap();
        }
        assert_eq!(out_rx.recv().await, Some(Message::Text("join".to_string().into())));
        assert_eq!(out_rx.recv().await, Some(Message::Text("offer".to_string().into())));

        cancel.cancel();
        pump.await.unwrap();
        match out_rx.recv().await {
            Some(Message::Close(frame)) => assert!(is_final(frame.as_ref())),
            other => panic!("expected a final close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_the_queue_also_says_goodbye() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::channel(16);
        let pump = tokio::spawn(write_pump(
            recording_sink(out_tx, usize::MAX),
            queue_rx,
            CancellationToken::new(),
        ));
        drop(queue_tx);
        pump.await.unwrap();
        assert!(matches!(out_rx.recv().await, Some(Message::Close(_))));
    }

    #[tokio::test]
    async fn failed_write_skips_close_frame() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::channel(16);
        let pump = tokio::spawn(write_pump(recording_sink(out_tx, 1), queue_rx, CancellationToken::new()));

        queue_tx.send(Message::Text("a".to_string().into())).await.unwrap();
        queue_tx.send(Message::Text("b".to_string().into())).await.unwrap();
        pump.await.unwrap();

        assert_eq!(out_rx.recv().await, Some(Message::Text("a".to_string().into())));
        assert!(out_rx.recv().await.is_none());
    }
}
