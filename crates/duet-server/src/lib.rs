//! duet-server: Real-time check-in session coordinator daemon
//!
//! The server keeps two partners' clients consistent with one shared
//! session: presence, turn-taking, step progression, optimistic note
//! editing with timed locks, and completion metrics, with every applied
//! change fanned out to the session's subscribers.

pub mod broadcast;
pub mod coordinator;
pub mod server;
pub mod session;

pub use broadcast::Broadcaster;
pub use coordinator::Coordinator;
pub use server::CheckinServer;
pub use session::SessionStore;
