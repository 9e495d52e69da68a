//! Chunked file transfer over a [`peerdrop_data_channel::ChannelTransport`].
//!
//! The sending side streams a [`FileSource`] as indexed frames under
//! high/low water-mark backpressure ([`ChunkSender`]) and walks a queue of
//! files one handshake at a time ([`SendQueue`]). The receiving side
//! ([`ChunkReceiver`]) checks frame order, spools payloads through a
//! bounded queue into a [`ChunkStore`] and reassembles the file once every
//! byte has arrived.

mod chunked;
mod progress;
mod queue;
mod receiver;
mod sender;
mod store;
mod types;
mod validation;

pub use chunked::{ChunkReader, FileSource, checksum_bytes};
pub use progress::SpeedCalculator;
pub use queue::{QueueHandle, SendQueue};
pub use receiver::{ChunkOutcome, ChunkReceiver};
pub use sender::{ChunkSender, SendControl};
pub use store::{ChunkStore, FsChunkStore, MemoryChunkStore, StoreFuture};
pub use types::{ReceiveState, ReceivedFile, SendEvent, SendOutcome, TransferProgress};
pub use validation::sanitize_file_name;

use peerdrop_data_channel::ChannelError;
use peerdrop_protocol::ProtocolError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("transfer aborted")]
    Aborted,

    #[error("peer cancelled the transfer")]
    PeerCancelled,

    #[error("transport closed during transfer")]
    ChannelClosed,

    #[error("chunk {index} rejected after retry: {reason}")]
    SendFailed { index: u32, reason: String },

    #[error("file has more chunks than a 32-bit index can address")]
    TooManyChunks,

    #[error("chunk index gap: expected {expected}, got {got}")]
    IndexGap { expected: u32, got: u32 },

    #[error("received {received} bytes, more than the announced {expected}")]
    Overshoot { expected: u64, received: u64 },

    #[error("reassembled {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("chunk store: {0}")]
    Store(String),

    #[error("{op} not valid while {state}")]
    InvalidState { op: &'static str, state: String },
}
