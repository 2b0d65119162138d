//! Session store: the single source of truth for live sessions
//!
//! Every session lives behind its own async mutex, so concurrent commands
//! for the same session serialize their read-modify-write cycles while
//! operations on different sessions proceed in parallel. No component may
//! touch a session except through [`SessionStore::mutate`].

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use duet_core::{CheckinSession, CommandError, Couple};
use duet_protocol::{SessionId, SessionSnapshot};

/// Registry of all live sessions, indexed by session ID
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
}

/// One session behind its single-writer lock
struct SessionEntry {
    session: Mutex<CheckinSession>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a fresh, not-yet-started session for a couple
    pub fn create(&self, couple: Couple, turn_based_mode: bool) -> SessionSnapshot {
        let id = SessionId::generate();
        let session = CheckinSession::new(id.clone(), couple, turn_based_mode);
        let snapshot = session.snapshot();

        self.sessions.insert(
            id,
            Arc::new(SessionEntry {
                session: Mutex::new(session),
            }),
        );

        snapshot
    }

    /// Read a consistent snapshot of one session
    pub async fn snapshot(&self, id: &SessionId) -> Result<SessionSnapshot, CommandError> {
        let entry = self.entry(id)?;
        let session = entry.session.lock().await;
        Ok(session.snapshot())
    }

    /// Apply a mutation to one session under its exclusive lock.
    ///
    /// Unknown ids fail with `NotFound`; completed sessions are closed to
    /// all further mutation and fail with `SessionClosed` before `f` runs.
    /// If `f` returns an error the session is left exactly as it was.
    pub async fn mutate<T, F>(&self, id: &SessionId, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut CheckinSession) -> Result<T, CommandError>,
    {
        let entry = self.entry(id)?;
        let mut session = entry.session.lock().await;

        if session.is_closed() {
            return Err(CommandError::SessionClosed);
        }

        f(&mut session)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // Clone the entry Arc out of the map so no shard guard is held
    // across an await on the session lock.
    fn entry(&self, id: &SessionId) -> Result<Arc<SessionEntry>, CommandError> {
        self.sessions
            .get(id)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| CommandError::NotFound(format!("session {}", id)))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
