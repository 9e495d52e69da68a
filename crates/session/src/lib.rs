//! One PeerDrop session: a room, a peer and the transfers between them.
//!
//! [`SessionController::spawn`] starts the loop and returns a
//! [`SessionHandle`] for [`Command`]s plus a receiver of
//! [`SessionEvent`]s.

mod context;
mod controller;
mod error;
mod types;

pub use context::SessionContext;
pub use controller::{SessionController, SessionHandle};
pub use error::SessionError;
pub use types::{Command, SessionConfig, SessionEvent};
