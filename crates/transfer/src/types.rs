use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use peerdrop_protocol::FileMeta;

/// Snapshot of one transfer's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub name: String,
    pub bytes: u64,
    pub total: u64,
    pub bytes_per_second: f64,
    pub eta: Option<Duration>,
}

impl TransferProgress {
    pub fn new(meta: &FileMeta) -> Self {
        Self {
            name: meta.name.clone(),
            bytes: 0,
            total: meta.size,
            bytes_per_second: 0.0,
            eta: None,
        }
    }

    /// Completion in percent, 100 for an empty file.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.bytes as f64 * 100.0 / self.total as f64
    }
}

/// How an outgoing file ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The receiver confirmed reassembly of this many bytes.
    Delivered { bytes: u64 },
    Rejected,
    Cancelled,
    Failed(String),
}

/// Reported by the send queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SendEvent {
    /// `file-request` sent, waiting for the receiver's decision.
    Offered(FileMeta),
    /// The receiver accepted; chunks are flowing.
    Started(FileMeta),
    Progress(TransferProgress),
    /// Periodic receiver acknowledgement.
    Acked { bytes_received: u64 },
    Finished { meta: FileMeta, outcome: SendOutcome },
    /// Every queued file reached a terminal state.
    QueueDrained,
}

/// Receiver lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveState {
    Idle,
    /// A `file-request` awaits the local accept/reject decision.
    Offering,
    Receiving,
    Finalizing,
    Complete,
    Error(String),
}

impl ReceiveState {
    /// A new `file-request` may be taken.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReceiveState::Idle | ReceiveState::Complete | ReceiveState::Error(_)
        )
    }
}

impl fmt::Display for ReceiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveState::Idle => f.write_str("idle"),
            ReceiveState::Offering => f.write_str("offering"),
            ReceiveState::Receiving => f.write_str("receiving"),
            ReceiveState::Finalizing => f.write_str("finalizing"),
            ReceiveState::Complete => f.write_str("complete"),
            ReceiveState::Error(reason) => write!(f, "error ({reason})"),
        }
    }
}

/// A fully reassembled incoming file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub meta: FileMeta,
    pub data: Bytes,
    /// Hex SHA-256 of `data`.
    pub sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_empty_file_is_complete() {
        let p = TransferProgress::new(&FileMeta::new("empty", 0, "text/plain"));
        assert_eq!(p.percent(), 100.0);
    }

    #[test]
    fn percent_tracks_bytes() {
        let mut p = TransferProgress::new(&FileMeta::new("a.bin", 400, "application/octet-stream"));
        p.bytes = 100;
        assert_eq!(p.percent(), 25.0);
    }

    #[test]
    fn terminal_states_accept_new_requests() {
        assert!(ReceiveState::Idle.is_terminal());
        assert!(ReceiveState::Error("x".into()).is_terminal());
        assert!(!ReceiveState::Receiving.is_terminal());
        assert!(!ReceiveState::Offering.is_terminal());
    }
}
