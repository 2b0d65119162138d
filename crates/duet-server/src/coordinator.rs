//! Check-in coordinator
//!
//! `Coordinator` is the single entry point for every inbound operation.
//! Each method applies its mutation through the session store's
//! per-session lock and publishes the resulting event while still
//! holding it, so the broadcast order always matches the mutation order.
//! Denials and conflicts come back as errors to the caller and are never
//! broadcast.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use duet_core::{CheckinSession, CommandError, CoordinatorConfig, Couple};
use duet_protocol::{
    CompletionSummary, NoteId, NotePayload, NotePrivacy, ParticipantId, ServerEvent, SessionId,
    SessionMetrics, SessionSnapshot,
};

use crate::broadcast::Broadcaster;
use crate::session::notes::LockGrant;
use crate::session::{notes, presence, steps, turn, SessionStore};

/// Owns all live session state and fans out every applied change
pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<SessionStore>,
    broadcaster: Arc<Broadcaster>,
}

impl Coordinator {
    /// Create a coordinator with an empty session registry
    pub fn new(config: CoordinatorConfig) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.event_channel_capacity));
        Self {
            config,
            store: Arc::new(SessionStore::new()),
            broadcaster,
        }
    }

    /// Daemon configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Session registry, for introspection
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Provision a fresh session for a couple
    pub fn create_session(
        &self,
        partner_a: ParticipantId,
        partner_b: ParticipantId,
        turn_based_mode: bool,
    ) -> SessionSnapshot {
        let snapshot = self
            .store
            .create(Couple::new(partner_a, partner_b), turn_based_mode);
        tracing::info!(
            "Created session {} (turn_based: {})",
            snapshot.id,
            turn_based_mode
        );
        snapshot
    }

    /// Subscribe a participant to a session.
    ///
    /// Membership is verified before any state is touched. The join is
    /// announced to the existing subscribers first and the receiver is
    /// created after, still under the session lock: the joiner's own
    /// arrival is carried by the returned snapshot, and every event from
    /// here on is observed.
    pub async fn join(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<ServerEvent>), CommandError> {
        self.store
            .mutate(session_id, |session| {
                if !session.is_member(participant) {
                    return Err(CommandError::Unauthorized(format!(
                        "{} is not a member of session {}",
                        participant, session_id
                    )));
                }

                self.publish_all(session_id, presence::join(session, participant, Utc::now()));
                let receiver = self.broadcaster.subscribe(session_id);
                Ok((session.snapshot(), receiver))
            })
            .await
    }

    /// Withdraw a participant from a session
    pub async fn leave(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.store
            .mutate(session_id, |session| {
                self.publish_all(session_id, presence::leave(session, participant, Utc::now()));
                Ok(())
            })
            .await
    }

    /// Claim the exclusive turn token
    pub async fn request_turn(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            turn::request_turn(session, participant, Utc::now())
        })
        .await
    }

    /// Give the turn token back
    pub async fn release_turn(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            turn::release_turn(session, participant, Utc::now())
        })
        .await
    }

    /// Jump to another step
    pub async fn advance_step(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        step: &str,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            steps::advance_step(session, participant, step, Utc::now())
        })
        .await
    }

    /// Record completion of the current step
    pub async fn complete_step(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            steps::complete_step(session, participant, Utc::now())
        })
        .await
    }

    /// Pause the session
    pub async fn pause_session(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            steps::pause(session, participant, Utc::now())
        })
        .await
    }

    /// Resume a paused session
    pub async fn resume_session(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            steps::resume(session, participant, Utc::now())
        })
        .await
    }

    /// Complete the session and derive final metrics. Terminal.
    pub async fn complete_session(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        summary: &CompletionSummary,
    ) -> Result<SessionMetrics, CommandError> {
        if let Some(reflection) = &summary.reflection {
            // The reflection text itself belongs to the external notes
            // system; the coordinator only acknowledges it.
            tracing::debug!(
                "Completion reflection for session {}: {} chars",
                session_id,
                reflection.len()
            );
        }

        self.store
            .mutate(session_id, |session| {
                let (metrics, event) = steps::complete(session, participant, summary, Utc::now())?;
                self.broadcaster.publish(session_id, event);
                Ok(metrics)
            })
            .await
    }

    /// Create a note in the session
    pub async fn create_note(
        &self,
        session_id: &SessionId,
        author: &ParticipantId,
        content: String,
        privacy: NotePrivacy,
        category_id: Option<String>,
    ) -> Result<NotePayload, CommandError> {
        self.store
            .mutate(session_id, |session| {
                let (payload, event) =
                    notes::create(session, author, content, privacy, category_id, Utc::now())?;
                self.broadcaster.publish(session_id, event);
                Ok(payload)
            })
            .await
    }

    /// Optimistically update a note
    pub async fn update_note(
        &self,
        session_id: &SessionId,
        requester: &ParticipantId,
        note_id: &NoteId,
        content: String,
        observed_version: u64,
    ) -> Result<NotePayload, CommandError> {
        self.store
            .mutate(session_id, |session| {
                let (payload, event) = notes::update(
                    session,
                    requester,
                    note_id,
                    content,
                    observed_version,
                    Utc::now(),
                )?;
                self.broadcaster.publish(session_id, event);
                Ok(payload)
            })
            .await
    }

    /// Acquire a note's editing lock and schedule its TTL release
    pub async fn lock_note(
        &self,
        session_id: &SessionId,
        requester: &ParticipantId,
        note_id: &NoteId,
    ) -> Result<(), CommandError> {
        let grant = self
            .store
            .mutate(session_id, |session| {
                let (grant, event) = notes::lock(session, requester, note_id, Utc::now())?;
                self.broadcaster.publish(session_id, event);
                Ok(grant)
            })
            .await?;

        self.schedule_lock_expiry(session_id.clone(), grant);
        Ok(())
    }

    /// Release a held editing lock
    pub async fn unlock_note(
        &self,
        session_id: &SessionId,
        requester: &ParticipantId,
        note_id: &NoteId,
    ) -> Result<(), CommandError> {
        self.apply(session_id, |session| {
            notes::unlock(session, requester, note_id, Utc::now())
        })
        .await
    }

    /// Relay an ephemeral typing signal; no state is touched
    pub fn typing_indicator(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        context: String,
        is_typing: bool,
    ) {
        self.broadcaster.publish(
            session_id,
            ServerEvent::TypingIndicator {
                participant_id: participant.clone(),
                context,
                is_typing,
            },
        );
    }

    /// Relay an ephemeral emoji reaction; no state is touched
    pub fn send_reaction(&self, session_id: &SessionId, participant: &ParticipantId, emoji: String) {
        self.broadcaster.publish(
            session_id,
            ServerEvent::ReactionReceived {
                emoji,
                by: participant.clone(),
            },
        );
    }

    // Mutate-then-publish for single-event operations.
    async fn apply<F>(&self, session_id: &SessionId, f: F) -> Result<(), CommandError>
    where
        F: FnOnce(&mut CheckinSession) -> Result<ServerEvent, CommandError>,
    {
        self.store
            .mutate(session_id, |session| {
                let event = f(session)?;
                self.broadcaster.publish(session_id, event);
                Ok(())
            })
            .await
    }

    fn publish_all(&self, session_id: &SessionId, events: Vec<ServerEvent>) {
        for event in events {
            self.broadcaster.publish(session_id, event);
        }
    }

    // The TTL task holds no lock while waiting. When it fires it
    // re-checks the grant under the session lock; a lock that was
    // explicitly released or refreshed in the meantime is left alone,
    // and a session that completed is simply skipped.
    fn schedule_lock_expiry(&self, session_id: SessionId, grant: LockGrant) {
        let store = Arc::clone(&self.store);
        let broadcaster = Arc::clone(&self.broadcaster);
        let ttl = self.config.note_lock_ttl;

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let result = store
                .mutate(&session_id, |session| {
                    if let Some(event) = notes::expire_lock(session, &grant) {
                        broadcaster.publish(&session_id, event);
                    }
                    Ok(())
                })
                .await;

            if let Err(e) = result {
                // Session finished or disappeared before the TTL fired
                tracing::trace!(
                    "Lock expiry for note {} skipped: {}",
                    grant.note_id,
                    e
                );
            }
        });
    }
}
