//! Check-in session domain type
//!
//! `CheckinSession` is the single authoritative record for one check-in.
//! All coordinator components mutate it exclusively through the session
//! store's per-session lock; once `Completed` it is immutable.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use duet_protocol::{
    CheckinStep, NoteId, ParticipantId, SessionId, SessionMetrics, SessionSnapshot, SessionStatus,
    StepCompletion,
};

use crate::note::Note;

/// The two partners authorized for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Couple {
    pub partner_a: ParticipantId,
    pub partner_b: ParticipantId,
}

impl Couple {
    pub fn new(partner_a: ParticipantId, partner_b: ParticipantId) -> Self {
        Self {
            partner_a,
            partner_b,
        }
    }

    /// Whether `participant` is one of the two partners
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        participant == &self.partner_a || participant == &self.partner_b
    }

    /// The other partner, if `participant` is a member
    pub fn partner_of(&self, participant: &ParticipantId) -> Option<&ParticipantId> {
        if participant == &self.partner_a {
            Some(&self.partner_b)
        } else if participant == &self.partner_b {
            Some(&self.partner_a)
        } else {
            None
        }
    }
}

/// Authoritative state of one check-in session
#[derive(Debug, Clone)]
pub struct CheckinSession {
    pub id: SessionId,
    pub couple: Couple,
    pub status: SessionStatus,
    pub current_step: CheckinStep,
    pub turn_based_mode: bool,
    /// Holder of the exclusive turn token. Non-None only while
    /// `turn_based_mode` is set and the session is in progress.
    pub current_turn_holder: Option<ParticipantId>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub step_started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Currently-connected partners; always a subset of `couple`
    pub active_participants: HashSet<ParticipantId>,
    /// Accumulated time per step in milliseconds, folded in as steps change
    pub step_durations: HashMap<CheckinStep, i64>,
    pub step_completions: Vec<StepCompletion>,
    /// Client-reported running total; advisory only
    pub elapsed_seconds: u64,
    /// Final statistics; populated exactly once, at completion
    pub metrics: Option<SessionMetrics>,
    /// Notes created during this session, owned by the session's lock
    pub notes: HashMap<NoteId, Note>,
}

impl CheckinSession {
    /// Create a fresh, not-yet-started session
    pub fn new(id: SessionId, couple: Couple, turn_based_mode: bool) -> Self {
        Self {
            id,
            couple,
            status: SessionStatus::NotStarted,
            current_step: CheckinStep::Welcome,
            turn_based_mode,
            current_turn_holder: None,
            turn_started_at: None,
            step_started_at: None,
            paused_at: None,
            started_at: None,
            completed_at: None,
            last_activity_at: None,
            active_participants: HashSet::new(),
            step_durations: HashMap::new(),
            step_completions: Vec::new(),
            elapsed_seconds: 0,
            metrics: None,
            notes: HashMap::new(),
        }
    }

    /// Whether `participant` belongs to this session's couple
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.couple.is_member(participant)
    }

    /// Whether the session reached its terminal state
    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Stamp activity for idle tracking
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
    }

    /// Full wire view. Notes come out in creation order so clients render
    /// a stable list.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut notes: Vec<&Note> = self.notes.values().collect();
        notes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        let mut active_participants: Vec<ParticipantId> =
            self.active_participants.iter().cloned().collect();
        active_participants.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        SessionSnapshot {
            id: self.id.clone(),
            partner_a: self.couple.partner_a.clone(),
            partner_b: self.couple.partner_b.clone(),
            status: self.status,
            current_step: self.current_step,
            turn_based_mode: self.turn_based_mode,
            current_turn_holder: self.current_turn_holder.clone(),
            started_at: self.started_at,
            step_started_at: self.step_started_at,
            turn_started_at: self.turn_started_at,
            paused_at: self.paused_at,
            completed_at: self.completed_at,
            last_activity_at: self.last_activity_at,
            active_participants,
            step_durations: self.step_durations.clone(),
            step_completions: self.step_completions.clone(),
            elapsed_seconds: self.elapsed_seconds,
            metrics: self.metrics.clone(),
            notes: notes.into_iter().map(Note::to_payload).collect(),
        }
    }
}
