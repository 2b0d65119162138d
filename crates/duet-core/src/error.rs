//! Error types for the duet coordinator
//!
//! Everything in `CommandError` is a recoverable, caller-local condition:
//! it is reported back on the requester's reply path and never terminates
//! the session or the connection. Only transport-level failures end a
//! connection attempt.

use std::path::PathBuf;
use thiserror::Error;

use duet_protocol::{NoteId, ParticipantId};

/// Recoverable failure of one client command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Requesting identity is not part of the session's couple, or the
    /// command arrived before a subscription existed
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Command is illegal for the session's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Turn-based mutation attempted while someone else holds the turn
    #[error("Turn is held by {holder}")]
    TurnDenied { holder: ParticipantId },

    /// Optimistic update lost the race; the authoritative state rides
    /// along so the loser can reconcile without another round trip
    #[error("Note {note_id} is at version {current_version}")]
    VersionConflict {
        note_id: NoteId,
        current_version: u64,
        current_content: String,
    },

    /// Lock contention; names the current holder
    #[error("Note {note_id} is locked by {holder}")]
    AlreadyLocked { note_id: NoteId, holder: ParticipantId },

    /// Unknown session or note id
    #[error("Not found: {0}")]
    NotFound(String),

    /// The session completed; it is closed to all further mutation
    #[error("Session is completed and closed to further changes")]
    SessionClosed,

    /// Step identifier outside the fixed step set
    #[error("Unknown step identifier: {0}")]
    UnknownStep(String),
}

impl CommandError {
    /// Stable wire tag for this error, carried in error replies
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Unauthorized(_) => "unauthorized",
            CommandError::InvalidState(_) => "invalid_state",
            CommandError::TurnDenied { .. } => "turn_denied",
            CommandError::VersionConflict { .. } => "version_conflict",
            CommandError::AlreadyLocked { .. } => "already_locked",
            CommandError::NotFound(_) => "not_found",
            CommandError::SessionClosed => "session_closed",
            CommandError::UnknownStep(_) => "unknown_step",
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
