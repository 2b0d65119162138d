//! Completion metrics
//!
//! Derived exactly once, when a session completes, and immutable after
//! that. All inputs come from the accumulated session state.

use chrono::{DateTime, Utc};

use duet_core::CheckinSession;
use duet_protocol::{NotePrivacy, ParticipantId, SessionMetrics};

/// Derive completion statistics for a session.
///
/// `completer` anchors the participation balance: the fraction of the
/// session's notes they authored. With no notes at all the balance is
/// pinned to 0.5, neutral rather than a division by zero.
pub fn calculate(
    session: &CheckinSession,
    completer: &ParticipantId,
    now: DateTime<Utc>,
) -> SessionMetrics {
    let total_duration_minutes = session
        .started_at
        .map(|started| (now - started).num_minutes().max(0) as u64)
        .unwrap_or(0);

    let notes_created = session.notes.len() as u32;
    let shared_notes_created = session
        .notes
        .values()
        .filter(|note| note.privacy == NotePrivacy::Shared)
        .count() as u32;

    let participation_balance = if notes_created == 0 {
        0.5
    } else {
        let authored = session
            .notes
            .values()
            .filter(|note| &note.author_id == completer)
            .count();
        authored as f64 / notes_created as f64
    };

    SessionMetrics {
        total_duration_minutes,
        notes_created,
        shared_notes_created,
        steps_completed: session.step_completions.len() as u32,
        participation_balance,
    }
}
