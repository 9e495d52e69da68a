//! A single WebSocket connection to the relay and its pump tasks.

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use peerdrop_protocol::constants::RELAY_MAX_MESSAGE_SIZE;

use crate::pumps::read::ReadOutcome;
use crate::types::LinkEvent;

/// Errors from the relay link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] peerdrop_protocol::ProtocolError),

    #[error("relay link closed")]
    Closed,
}

/// One live WebSocket to the relay.
///
/// Dropping the link cancels its pumps; the write pump sends a normal
/// close frame on the way out.
pub(crate) struct WsLink {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    _write_handle: JoinHandle<()>,
    _ping_handle: JoinHandle<()>,
}

impl WsLink {
    /// Connects and starts the pumps. The returned handle resolves when the
    /// read side ends.
    pub(crate) async fn open(
        url: &str,
        events_tx: broadcast::Sender<LinkEvent>,
    ) -> Result<(Self, JoinHandle<ReadOutcome>), LinkError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(RELAY_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(RELAY_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read, events_tx, write_tx, cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        let link = Self {
            write_tx,
            cancel,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        };
        Ok((link, read_handle))
    }

    pub(crate) async fn send_text(&self, text: String) -> Result<(), LinkError> {
        self.write_tx
            .send(tungstenite::Message::Text(text.into()))
            .await
            .map_err(|_| LinkError::Closed)
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_error_display() {
        assert_eq!(LinkError::Closed.to_string(), "relay link closed");
    }

    #[tokio::test]
    async fn open_fails_for_unreachable_relay() {
        let (tx, _rx) = broadcast::channel(4);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = WsLink::open(&format!("ws://{addr}/"), tx).await;
        assert!(matches!(result, Err(LinkError::Ws(_))));
    }
}
