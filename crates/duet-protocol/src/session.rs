//! Session wire types: status, steps, snapshots, and completion metrics

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, SessionId};
use crate::note::NotePayload;

/// Lifecycle status of a check-in session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session exists but no partner has joined yet
    NotStarted,
    /// Session is live and accepting mutations
    InProgress,
    /// Session is paused (explicitly, or because everyone left)
    Paused,
    /// Session is finished; no further mutation is permitted
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::NotStarted => write!(f, "not_started"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// The fixed ordered set of check-in steps.
///
/// Step navigation is an explicit jump to any step in this set; the order
/// here is the canonical conversation order, not a transition constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinStep {
    Welcome,
    CategorySelection,
    CategoryDiscussion,
    Reflection,
    ActionItems,
    Completion,
}

impl CheckinStep {
    /// All steps in canonical conversation order
    pub const ALL: [CheckinStep; 6] = [
        CheckinStep::Welcome,
        CheckinStep::CategorySelection,
        CheckinStep::CategoryDiscussion,
        CheckinStep::Reflection,
        CheckinStep::ActionItems,
        CheckinStep::Completion,
    ];

    /// Wire identifier for this step
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckinStep::Welcome => "welcome",
            CheckinStep::CategorySelection => "category_selection",
            CheckinStep::CategoryDiscussion => "category_discussion",
            CheckinStep::Reflection => "reflection",
            CheckinStep::ActionItems => "action_items",
            CheckinStep::Completion => "completion",
        }
    }

    /// Parse a wire identifier; returns `None` for anything outside the set
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "welcome" => Some(CheckinStep::Welcome),
            "category_selection" => Some(CheckinStep::CategorySelection),
            "category_discussion" => Some(CheckinStep::CategoryDiscussion),
            "reflection" => Some(CheckinStep::Reflection),
            "action_items" => Some(CheckinStep::ActionItems),
            "completion" => Some(CheckinStep::Completion),
            _ => None,
        }
    }
}

impl fmt::Display for CheckinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of one completed step, appended in completion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletion {
    /// Which step was completed
    pub step: CheckinStep,
    /// When the participant marked it complete
    pub completed_at: DateTime<Utc>,
    /// Time spent on the step since it was entered, in milliseconds
    pub duration_ms: i64,
}

/// Statistics derived once, at session completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Wall-clock session length from start to completion, in minutes
    pub total_duration_minutes: u64,
    /// Number of notes created through the session
    pub notes_created: u32,
    /// Number of those notes with shared privacy
    pub shared_notes_created: u32,
    /// Number of step completion records
    pub steps_completed: u32,
    /// Fraction of notes authored by the completing participant.
    /// Exactly 0.5 when the session has no notes.
    pub participation_balance: f64,
}

/// Client-reported wrap-up details attached to `complete_session`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSummary {
    /// Free-form closing reflection, stored by the external notes system
    pub reflection: Option<String>,
    /// Client-side running total of active conversation time. Advisory only.
    pub elapsed_seconds: Option<u64>,
}

/// Full wire view of a session, sent on join so a (re)connecting client
/// can reconcile without a second round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub partner_a: ParticipantId,
    pub partner_b: ParticipantId,
    pub status: SessionStatus,
    pub current_step: CheckinStep,
    pub turn_based_mode: bool,
    pub current_turn_holder: Option<ParticipantId>,
    pub started_at: Option<DateTime<Utc>>,
    pub step_started_at: Option<DateTime<Utc>>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub active_participants: Vec<ParticipantId>,
    /// Accumulated time per step, in milliseconds
    pub step_durations: HashMap<CheckinStep, i64>,
    pub step_completions: Vec<StepCompletion>,
    pub elapsed_seconds: u64,
    pub metrics: Option<SessionMetrics>,
    pub notes: Vec<NotePayload>,
}
