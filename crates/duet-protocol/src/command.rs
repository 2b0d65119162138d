//! Inbound commands and their per-command replies
//!
//! Clients speak line-delimited JSON: each line is one `ClientCommand`,
//! and the server answers every command with exactly one `CommandReply`
//! line. Broadcast traffic (other participants' changes) arrives as
//! separate `ServerEvent` lines; see `event.rs`.
//!
//! # Command Flow
//!
//! Typical sequence for one client:
//!
//! 1. Client connects and sends `join` (or `create_session` then `join`)
//! 2. Server validates couple membership and replies `joined` with a
//!    full session snapshot
//! 3. Turn, step, and note commands flow; each gets a reply, and every
//!    applied mutation is also broadcast to both subscribers
//! 4. `leave` (or disconnect) withdraws the client from the session

use serde::{Deserialize, Serialize};

use crate::ids::{NoteId, ParticipantId, SessionId};
use crate::note::{NotePayload, NotePrivacy};
use crate::session::{CompletionSummary, SessionSnapshot};

/// Command from a client to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Provision a fresh session for a couple
    CreateSession {
        partner_a: ParticipantId,
        partner_b: ParticipantId,
        #[serde(default)]
        turn_based_mode: bool,
    },

    /// Subscribe this connection to a session as one of its partners
    Join {
        session_id: SessionId,
        participant_id: ParticipantId,
    },

    /// Withdraw from the current session (connection stays open)
    Leave,

    /// Claim the exclusive turn token (turn-based mode only)
    RequestTurn,

    /// Give the turn token back
    ReleaseTurn,

    /// Jump to another step; back-navigation is allowed
    AdvanceStep {
        /// Step identifier, validated against the fixed step set
        step: String,
    },

    /// Record completion of the current step without leaving it
    CompleteStep,

    /// Pause the session
    PauseSession,

    /// Resume a paused session
    ResumeSession,

    /// Finish the session and compute metrics. Terminal.
    CompleteSession {
        #[serde(default)]
        summary: CompletionSummary,
    },

    /// Create a note in the session
    CreateNote {
        content: String,
        privacy: NotePrivacy,
        category_id: Option<String>,
    },

    /// Optimistically update a note; `version` is the version the client
    /// last observed
    UpdateNote {
        note_id: NoteId,
        content: String,
        version: u64,
    },

    /// Acquire the editing lock for a note
    LockNote { note_id: NoteId },

    /// Release a held editing lock
    UnlockNote { note_id: NoteId },

    /// Ephemeral typing signal, relayed to the partner
    TypingIndicator { context: String, is_typing: bool },

    /// Ephemeral emoji reaction, relayed to the partner
    SendReaction { emoji: String },

    /// Keepalive
    Ping,
}

/// Reply from the coordinator to the issuing client.
///
/// Denials and conflicts are replies, never broadcasts: they always carry
/// enough authoritative state for the client to reconcile locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandReply {
    /// Session provisioned
    SessionCreated { session: SessionSnapshot },

    /// Subscription accepted; full state for reconciliation
    Joined { session: SessionSnapshot },

    /// Generic success
    Ok,

    /// Note-returning success (create/update)
    Note { note: NotePayload },

    /// Turn request refused; names who holds it
    TurnDenied { current_holder: ParticipantId },

    /// Optimistic update lost the race; authoritative state attached
    EditConflict {
        note_id: NoteId,
        current_version: u64,
        current_content: String,
    },

    /// Recoverable failure, tagged with the error taxonomy kind
    Error { kind: String, message: String },

    /// Keepalive answer
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tag_format() {
        let json = r#"{"type":"update_note","note_id":"n1","content":"x","version":4}"#;
        let command: ClientCommand = serde_json::from_str(json).unwrap();
        match command {
            ClientCommand::UpdateNote {
                note_id, version, ..
            } => {
                assert_eq!(note_id.as_str(), "n1");
                assert_eq!(version, 4);
            }
            other => panic!("Expected UpdateNote, got {:?}", other),
        }
    }

    #[test]
    fn test_join_command_parses() {
        let json = r#"{"type":"join","session_id":"s1","participant_id":"alice"}"#;
        let command: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(command, ClientCommand::Join { .. }));
    }

    #[test]
    fn test_complete_session_summary_is_optional() {
        let json = r#"{"type":"complete_session"}"#;
        let command: ClientCommand = serde_json::from_str(json).unwrap();
        match command {
            ClientCommand::CompleteSession { summary } => {
                assert!(summary.reflection.is_none());
                assert!(summary.elapsed_seconds.is_none());
            }
            other => panic!("Expected CompleteSession, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_serializes_with_type_tag() {
        let reply = CommandReply::TurnDenied {
            current_holder: ParticipantId::new("bob"),
        };
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("\"type\":\"turn_denied\""));
        assert!(json.contains("\"current_holder\":\"bob\""));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let json = r#"{"type":"drop_tables"}"#;
        assert!(serde_json::from_str::<ClientCommand>(json).is_err());
    }
}
