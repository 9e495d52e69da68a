//! The sub-channel seam shared by the WebRTC and loopback implementations.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::ChannelError;

/// Boxed future returned by [`SubChannel`] methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message carried by a sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle and traffic notifications from one sub-channel.
///
/// Each sub-channel hands out its own receiver at construction, so
/// handling is serialized per sub-channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Closed,
    Message(Payload),
    /// Buffered amount crossed down to the low-water threshold.
    BufferedAmountLow,
}

/// One ordered, reliable sub-channel.
pub trait SubChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Queues a message. Fails on a non-open channel or when the
    /// underlying transport rejects the write.
    fn send(&self, payload: Payload) -> ChannelFuture<'_, Result<(), ChannelError>>;

    /// Bytes queued locally but not yet handed to the network.
    fn buffered_amount(&self) -> ChannelFuture<'_, usize>;

    /// Sets the threshold at which [`ChannelEvent::BufferedAmountLow`] fires.
    fn set_low_water_mark(&self, threshold: usize) -> ChannelFuture<'_, ()>;

    fn close(&self) -> ChannelFuture<'_, ()>;
}
