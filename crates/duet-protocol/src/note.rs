//! Note wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NoteId, ParticipantId};

/// Visibility of a note between the two partners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotePrivacy {
    /// Visible only to the author
    Private,
    /// Visible to both partners
    Shared,
    /// Work in progress, not yet shared
    Draft,
}

/// Wire view of a note, carried by `note_created`/`note_updated` events
/// and the join snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    pub id: NoteId,
    pub content: String,
    pub privacy: NotePrivacy,
    pub author_id: ParticipantId,
    /// Opaque reference to the externally-stored category, if any
    pub category_id: Option<String>,
    /// Monotonic version, incremented on every accepted update
    pub version: u64,
    pub locked_by: Option<ParticipantId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_edited_by: Option<ParticipantId>,
    pub created_at: DateTime<Utc>,
    /// True for notes created through the real-time engine
    pub synchronized: bool,
}
