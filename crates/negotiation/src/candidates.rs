//! FIFO of remote candidates that arrived before a remote description.

use std::collections::VecDeque;

use tracing::warn;

use peerdrop_protocol::IceCandidate;

/// Upper bound on buffered candidates.
pub const MAX_BUFFERED_CANDIDATES: usize = 256;

/// Bounded FIFO. When full, the oldest candidate is dropped.
#[derive(Debug)]
pub struct CandidateBuffer {
    queue: VecDeque<IceCandidate>,
    capacity: usize,
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_BUFFERED_CANDIDATES)
    }
}

impl CandidateBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(
                    capacity = self.capacity,
                    candidate = %dropped.candidate,
                    "candidate buffer full, dropping oldest"
                );
            }
        }
        self.queue.push_back(candidate);
    }

    /// Removes every buffered candidate in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.queue.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
