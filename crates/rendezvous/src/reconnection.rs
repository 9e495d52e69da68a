//! Relay link supervision and the fixed-delay reconnect loop.
//!
//! Contains the shared [`LinkContext`], cancellation helpers, the link
//! supervisor, and the reconnect loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peerdrop_protocol::Envelope;

use crate::link::{LinkError, WsLink};
use crate::pumps::read::ReadOutcome;
use crate::types::{LinkEvent, LinkState, ReconnectConfig};

/// Shared state for the client, its supervisor and its reconnect loop.
#[derive(Clone)]
pub(crate) struct LinkContext {
    pub(crate) url: Arc<RwLock<Option<String>>>,
    pub(crate) room: Arc<RwLock<Option<String>>>,
    pub(crate) state: Arc<RwLock<LinkState>>,
    pub(crate) link: Arc<Mutex<Option<WsLink>>>,
    pub(crate) events_tx: broadcast::Sender<LinkEvent>,
    pub(crate) reconnect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) manual_close: Arc<AtomicBool>,
    pub(crate) reconnect_config: ReconnectConfig,
}

impl LinkContext {
    pub(crate) fn new(reconnect_config: ReconnectConfig, capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity);
        Self {
            url: Arc::new(RwLock::new(None)),
            room: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(LinkState::Idle)),
            link: Arc::new(Mutex::new(None)),
            events_tx,
            reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
            manual_close: Arc::new(AtomicBool::new(false)),
            reconnect_config,
        }
    }

    pub(crate) async fn set_state(&self, state: LinkState) {
        *self.state.write().await = state.clone();
        let _ = self.events_tx.send(LinkEvent::StateChanged(state));
    }
}

/// Cancels the active reconnect loop, if any.
pub(crate) fn cancel_reconnect(
    reconnect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
) {
    if let Ok(mut guard) = reconnect_cancel.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Opens a link to `url`, marks it Open and re-sends `join` for the
/// current room. Spawns the supervisor that reacts to the link ending.
pub(crate) async fn establish(ctx: &LinkContext, url: &str) -> Result<(), LinkError> {
    let (link, read_handle) = WsLink::open(url, ctx.events_tx.clone()).await?;

    let room = ctx.room.read().await.clone();
    if let Some(room) = &room {
        link.send_text(Envelope::join(room.as_str()).to_json()?).await?;
        debug!(room = %room, "re-sent join on open");
    }

    *ctx.link.lock().await = Some(link);
    ctx.set_state(LinkState::Open).await;
    info!(url, "relay link open");

    tokio::spawn(supervise(ctx.clone(), read_handle));
    Ok(())
}

/// Waits for the read side of a link to end and decides whether to
/// reconnect.
///
/// Returns a boxed future to break the type cycle with [`reconnect_loop`],
/// which calls [`establish`], which spawns this.
pub(crate) fn supervise(
    ctx: LinkContext,
    read_handle: JoinHandle<ReadOutcome>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let outcome = read_handle.await.unwrap_or(ReadOutcome::Lost);
        if outcome == ReadOutcome::Cancelled {
            return;
        }

        ctx.link.lock().await.take();

        let no_reconnect =
            outcome == ReadOutcome::ClosedNormally || ctx.manual_close.load(Ordering::Relaxed);
        if no_reconnect {
            info!("relay closed the link normally");
            ctx.set_state(LinkState::Disconnected).await;
            return;
        }

        warn!("relay link lost");
        start_reconnect(&ctx);
    })
}

/// Replaces any running reconnect loop with a fresh one.
pub(crate) fn start_reconnect(ctx: &LinkContext) {
    let cancel = CancellationToken::new();
    cancel_reconnect(&ctx.reconnect_cancel);
    if let Ok(mut guard) = ctx.reconnect_cancel.lock() {
        *guard = Some(cancel.clone());
    }
    tokio::spawn(reconnect_loop(ctx.clone(), cancel));
}

/// Reconnection loop with a fixed delay and a capped number of attempts.
///
/// After the last failed attempt the link is left Disconnected; callers
/// must invoke `connect` again.
pub(crate) fn reconnect_loop(
    ctx: LinkContext,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if ctx.reconnect_config.exhausted(attempt) {
                info!(
                    attempts = ctx.reconnect_config.max_attempts,
                    "reconnect attempts exhausted"
                );
                ctx.set_state(LinkState::Disconnected).await;
                break;
            }

            let delay = ctx.reconnect_config.delay_for_attempt(attempt);
            ctx.set_state(LinkState::Reconnecting { attempt }).await;
            info!(
                attempt,
                delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() {
                return;
            }

            let Some(url) = ctx.url.read().await.clone() else {
                ctx.set_state(LinkState::Disconnected).await;
                break;
            };

            match establish(&ctx, &url).await {
                Ok(()) => {
                    info!(attempt, "reconnected to relay");
                    break;
                }
                Err(e) => {
                    warn!(attempt, "reconnect failed: {e}");
                }
            }
        }
    })
}
