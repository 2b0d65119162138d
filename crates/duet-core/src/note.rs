//! Note domain type

use chrono::{DateTime, Utc};

use duet_protocol::{NoteId, NotePayload, NotePrivacy, ParticipantId};

/// A note authored during a session.
///
/// The lock and version fields are only meaningful while the owning
/// session is active; the business record itself outlives the session in
/// external storage.
#[derive(Debug, Clone)]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    pub privacy: NotePrivacy,
    pub author_id: ParticipantId,
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

impl Note {
    /// Create a fresh synchronized note at version 0
    pub fn new(
        author_id: ParticipantId,
        content: String,
        privacy: NotePrivacy,
        category_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NoteId::generate(),
            content,
            privacy,
            author_id,
            category_id,
            version: 0,
            locked_by: None,
            locked_at: None,
            last_edited_by: None,
            created_at: now,
            synchronized: true,
        }
    }

    /// Whether someone other than `participant` holds the editing lock
    pub fn is_locked_by_other(&self, participant: &ParticipantId) -> bool {
        matches!(&self.locked_by, Some(holder) if holder != participant)
    }

    /// Wire view of this note
    pub fn to_payload(&self) -> NotePayload {
        NotePayload {
            id: self.id.clone(),
            content: self.content.clone(),
            privacy: self.privacy,
            author_id: self.author_id.clone(),
            category_id: self.category_id.clone(),
            version: self.version,
            locked_by: self.locked_by.clone(),
            locked_at: self.locked_at,
            last_edited_by: self.last_edited_by.clone(),
            created_at: self.created_at,
            synchronized: self.synchronized,
        }
    }
}
