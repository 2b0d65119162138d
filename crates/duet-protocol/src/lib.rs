//! duet-protocol: Wire protocol for duet check-in coordination
//!
//! This crate defines the JSON message surface exchanged between clients
//! and the coordinator over a persistent line-delimited connection:
//! inbound commands, per-command replies, and broadcast events, plus the
//! typed identifiers and payload structs they carry.

pub mod command;
pub mod event;
pub mod ids;
pub mod note;
pub mod session;

pub use command::{ClientCommand, CommandReply};
pub use event::ServerEvent;
pub use ids::{NoteId, ParticipantId, SessionId};
pub use note::{NotePayload, NotePrivacy};
pub use session::{
    CheckinStep, CompletionSummary, SessionMetrics, SessionSnapshot, SessionStatus, StepCompletion,
};
