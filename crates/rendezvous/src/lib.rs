//! Reconnecting link to the PeerDrop signaling relay.
//!
//! The relay is a dumb broker: it assigns roles on `join` and forwards every
//! other envelope to the other room member. This crate owns the WebSocket,
//! its pumps, and the fixed-delay reconnect policy.

pub mod client;
pub(crate) mod link;
mod pumps;
pub(crate) mod reconnection;
pub mod types;

pub use client::RendezvousClient;
pub use link::LinkError;
pub use types::{LinkEvent, LinkState, ReconnectConfig};
