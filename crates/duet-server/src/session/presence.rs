//! Presence tracking
//!
//! Keeps `active_participants` in step with who is actually connected.
//! Joining a fresh session starts it; the last participant leaving an
//! in-progress session pauses it. Rejoining never auto-resumes.

use chrono::{DateTime, Utc};

use duet_core::CheckinSession;
use duet_protocol::{ParticipantId, ServerEvent, SessionStatus};

/// Add a participant to the session's active set.
///
/// Idempotent: a participant that is already present only refreshes the
/// activity stamp and produces no event. Membership must be checked by
/// the caller before any state is touched.
pub fn join(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    // First arrival starts a not-yet-started check-in. A paused session
    // stays paused until someone explicitly resumes it.
    if session.status == SessionStatus::NotStarted {
        session.status = SessionStatus::InProgress;
        session.started_at = Some(now);
        session.step_started_at = Some(now);
        tracing::info!("Session {} started by {}", session.id, participant);
    }

    if session.active_participants.insert(participant.clone()) {
        events.push(ServerEvent::ParticipantJoined {
            participant_id: participant.clone(),
        });
    }

    session.touch(now);
    events
}

/// Remove a participant from the session's active set.
///
/// When the last participant of an in-progress session leaves, the
/// session pauses and the turn token (if any) is surrendered. Removing a
/// participant that was not present is a no-op with no events.
pub fn leave(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    if !session.active_participants.remove(participant) {
        return events;
    }

    events.push(ServerEvent::ParticipantLeft {
        participant_id: participant.clone(),
    });

    if session.active_participants.is_empty() && session.status == SessionStatus::InProgress {
        session.status = SessionStatus::Paused;
        session.paused_at = Some(now);
        // A paused session holds no turn token
        session.current_turn_holder = None;
        session.turn_started_at = None;

        tracing::info!("Session {} paused: no participants remain", session.id);
        events.push(ServerEvent::SessionPaused {
            by: participant.clone(),
        });
    }

    session.touch(now);
    events
}
