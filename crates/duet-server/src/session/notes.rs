//! Note synchronization
//!
//! Notes use optimistic concurrency control: an update must present the
//! version its author last observed, and a mismatch hands the
//! authoritative state back to the loser instead of merging. Editing
//! locks are advisory, exclusive, and expire after a TTL; expiry is
//! check-then-clear so it races safely with explicit unlocks.

use chrono::{DateTime, Utc};

use duet_core::{CheckinSession, CommandError, Note};
use duet_protocol::{NoteId, NotePayload, NotePrivacy, ParticipantId, ServerEvent};

/// Receipt for an acquired lock, used by the TTL task to release exactly
/// the grant it was scheduled for and nothing newer.
#[derive(Debug, Clone)]
pub struct LockGrant {
    pub note_id: NoteId,
    pub holder: ParticipantId,
    pub locked_at: DateTime<Utc>,
}

/// Create a synchronized note at version 0
pub fn create(
    session: &mut CheckinSession,
    author: &ParticipantId,
    content: String,
    privacy: NotePrivacy,
    category_id: Option<String>,
    now: DateTime<Utc>,
) -> Result<(NotePayload, ServerEvent), CommandError> {
    let note = Note::new(author.clone(), content, privacy, category_id, now);
    let payload = note.to_payload();

    tracing::debug!("Note {} created in session {} by {}", note.id, session.id, author);
    session.notes.insert(note.id.clone(), note);
    session.touch(now);

    let event = ServerEvent::NoteCreated {
        note: payload.clone(),
    };
    Ok((payload, event))
}

/// Apply an optimistic update.
///
/// `observed_version` must equal the stored version; otherwise the call
/// mutates nothing and reports the current content and version.
pub fn update(
    session: &mut CheckinSession,
    requester: &ParticipantId,
    note_id: &NoteId,
    new_content: String,
    observed_version: u64,
    now: DateTime<Utc>,
) -> Result<(NotePayload, ServerEvent), CommandError> {
    let note = session
        .notes
        .get_mut(note_id)
        .ok_or_else(|| CommandError::NotFound(format!("note {}", note_id)))?;

    if note.version != observed_version {
        return Err(CommandError::VersionConflict {
            note_id: note.id.clone(),
            current_version: note.version,
            current_content: note.content.clone(),
        });
    }

    note.content = new_content;
    note.version += 1;
    note.last_edited_by = Some(requester.clone());
    let payload = note.to_payload();
    session.touch(now);

    let event = ServerEvent::NoteUpdated {
        note: payload.clone(),
    };
    Ok((payload, event))
}

/// Acquire the editing lock for a note.
///
/// Fails with `AlreadyLocked` when someone else holds it. The holder may
/// re-lock, which refreshes the grant; the stale TTL task then finds a
/// newer `locked_at` and leaves the lock alone.
pub fn lock(
    session: &mut CheckinSession,
    requester: &ParticipantId,
    note_id: &NoteId,
    now: DateTime<Utc>,
) -> Result<(LockGrant, ServerEvent), CommandError> {
    let note = session
        .notes
        .get_mut(note_id)
        .ok_or_else(|| CommandError::NotFound(format!("note {}", note_id)))?;

    if let Some(holder) = &note.locked_by {
        if holder != requester {
            return Err(CommandError::AlreadyLocked {
                note_id: note.id.clone(),
                holder: holder.clone(),
            });
        }
    }

    note.locked_by = Some(requester.clone());
    note.locked_at = Some(now);
    session.touch(now);

    tracing::debug!("Note {} locked by {} in session {}", note_id, requester, session.id);
    let grant = LockGrant {
        note_id: note_id.clone(),
        holder: requester.clone(),
        locked_at: now,
    };
    let event = ServerEvent::NoteLocked {
        note_id: note_id.clone(),
        by: requester.clone(),
    };
    Ok((grant, event))
}

/// Release a held editing lock. Only the holder can.
pub fn unlock(
    session: &mut CheckinSession,
    requester: &ParticipantId,
    note_id: &NoteId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    let note = session
        .notes
        .get_mut(note_id)
        .ok_or_else(|| CommandError::NotFound(format!("note {}", note_id)))?;

    match &note.locked_by {
        Some(holder) if holder == requester => {
            note.locked_by = None;
            note.locked_at = None;
            session.touch(now);

            tracing::debug!("Note {} unlocked by {}", note_id, requester);
            Ok(ServerEvent::NoteUnlocked {
                note_id: note_id.clone(),
            })
        }
        Some(holder) => Err(CommandError::AlreadyLocked {
            note_id: note_id.clone(),
            holder: holder.clone(),
        }),
        None => Err(CommandError::InvalidState(format!(
            "note {} is not locked",
            note_id
        ))),
    }
}

/// TTL expiry: clear the lock only if the original grant still holds.
///
/// Returns `None` (no event, no change) when the note is gone, was
/// unlocked explicitly, or was re-locked since the grant. Firing the
/// timer before or after an explicit unlock converges on the same state.
pub fn expire_lock(session: &mut CheckinSession, grant: &LockGrant) -> Option<ServerEvent> {
    let note = session.notes.get_mut(&grant.note_id)?;

    let still_held = note.locked_by.as_ref() == Some(&grant.holder)
        && note.locked_at == Some(grant.locked_at);
    if !still_held {
        return None;
    }

    note.locked_by = None;
    note.locked_at = None;

    tracing::debug!(
        "Note {} lock expired for {} in session {}",
        grant.note_id,
        grant.holder,
        session.id
    );
    Some(ServerEvent::NoteUnlocked {
        note_id: grant.note_id.clone(),
    })
}
