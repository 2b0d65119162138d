//! Per-session event fan-out
//!
//! Each session gets its own broadcast topic, created lazily on first
//! subscribe. Publishing never blocks: subscribers that disconnected or
//! lagged past the channel capacity are dropped by the channel, not
//! retried.

use dashmap::DashMap;
use tokio::sync::broadcast;

use duet_protocol::{ServerEvent, SessionId};

/// Fan-out hub for session events
pub struct Broadcaster {
    capacity: usize,
    topics: DashMap<SessionId, broadcast::Sender<ServerEvent>>,
}

impl Broadcaster {
    /// Create a broadcaster whose topics buffer `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: DashMap::new(),
        }
    }

    /// Subscribe to a session's event stream, creating the topic if needed
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<ServerEvent> {
        self.topics
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an event to every current subscriber of a session.
    ///
    /// A topic with no subscribers (or no topic at all) swallows the
    /// event; there is nobody to tell.
    pub fn publish(&self, session_id: &SessionId, event: ServerEvent) {
        if let Some(tx) = self.topics.get(session_id) {
            match tx.send(event) {
                Ok(receivers) => {
                    tracing::trace!(
                        "Published event to {} subscribers of session {}",
                        receivers,
                        session_id
                    );
                }
                Err(_) => {
                    tracing::trace!("No subscribers for session {}", session_id);
                }
            }
        }
    }
}
