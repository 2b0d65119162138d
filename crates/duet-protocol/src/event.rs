//! Broadcast events pushed to session subscribers
//!
//! Every successfully applied mutation produces exactly one event on the
//! session's topic. Rejections never broadcast; they surface only on the
//! requester's reply path (`turn_denied`, `edit_conflict`).

use serde::{Deserialize, Serialize};

use crate::ids::{NoteId, ParticipantId};
use crate::note::NotePayload;
use crate::session::{CheckinStep, SessionMetrics};

/// Event pushed from the coordinator to every subscriber of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A partner joined the session
    ParticipantJoined { participant_id: ParticipantId },

    /// A partner left (explicitly or by disconnect)
    ParticipantLeft { participant_id: ParticipantId },

    /// The turn token changed hands
    TurnChanged { holder_id: ParticipantId },

    /// The turn token was given back
    TurnReleased { by: ParticipantId },

    /// The session moved to another step
    StepChanged {
        new_step: CheckinStep,
        by: ParticipantId,
    },

    /// The current step was marked complete
    StepCompleted { step: CheckinStep, duration_ms: i64 },

    /// Session paused, explicitly or because the last partner left
    SessionPaused { by: ParticipantId },

    /// Session explicitly resumed
    SessionResumed { by: ParticipantId },

    /// Session finished; metrics are final
    SessionCompleted { metrics: SessionMetrics },

    /// A note was created
    NoteCreated { note: NotePayload },

    /// A note was updated (version already bumped)
    NoteUpdated { note: NotePayload },

    /// A note's editing lock was acquired
    NoteLocked { note_id: NoteId, by: ParticipantId },

    /// A note's editing lock was released (explicitly or by TTL expiry)
    NoteUnlocked { note_id: NoteId },

    /// Partner is (or stopped) typing somewhere
    TypingIndicator {
        participant_id: ParticipantId,
        context: String,
        is_typing: bool,
    },

    /// Partner sent an emoji reaction
    ReactionReceived { emoji: String, by: ParticipantId },
}
