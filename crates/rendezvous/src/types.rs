//! Public types for the relay link.

use std::time::Duration;

use peerdrop_protocol::Envelope;
use peerdrop_protocol::constants::{RELAY_MAX_RECONNECT_ATTEMPTS, RELAY_RECONNECT_DELAY};

/// Lifecycle of the relay link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// `connect` has never been called.
    Idle,
    /// WebSocket handshake in progress.
    Connecting,
    /// Link is up; envelopes can be sent.
    Open,
    /// Link dropped unexpectedly, waiting before the given attempt.
    Reconnecting { attempt: u32 },
    /// Closed normally or retries exhausted. `connect` must be called again.
    Disconnected,
}

impl LinkState {
    pub fn is_active(&self) -> bool {
        matches!(self, LinkState::Open | LinkState::Connecting)
    }
}

/// Events broadcast to every subscriber of a [`crate::RendezvousClient`].
#[derive(Debug, Clone)]
pub enum LinkEvent {
    StateChanged(LinkState),
    /// A parsed envelope received from the relay.
    Envelope(Envelope),
}

/// Reconnection policy: a fixed delay and a capped attempt count.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: RELAY_RECONNECT_DELAY,
            max_attempts: RELAY_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based). Constant by policy.
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.delay
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_equality() {
        assert_eq!(LinkState::Open, LinkState::Open);
        assert_ne!(LinkState::Open, LinkState::Connecting);
        assert_eq!(
            LinkState::Reconnecting { attempt: 1 },
            LinkState::Reconnecting { attempt: 1 },
        );
        assert_ne!(
            LinkState::Reconnecting { attempt: 1 },
            LinkState::Reconnecting { attempt: 2 },
        );
    }

    #[test]
    fn active_states() {
        assert!(LinkState::Open.is_active());
        assert!(LinkState::Connecting.is_active());
        assert!(!LinkState::Reconnecting { attempt: 3 }.is_active());
        assert!(!LinkState::Disconnected.is_active());
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn reconnect_delay_is_fixed() {
        let config = ReconnectConfig::default();
        for attempt in 1..=10 {
            assert_eq!(config.delay_for_attempt(attempt), Duration::from_secs(2));
            assert!(!config.exhausted(attempt));
        }
        assert!(config.exhausted(11));
    }
}
