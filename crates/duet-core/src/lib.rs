//! duet-core: Domain model, errors, and configuration for duet
//!
//! This crate provides the session and note domain types mutated by the
//! coordinator, the recoverable error taxonomy surfaced to clients, and
//! the daemon configuration.

pub mod config;
pub mod error;
pub mod note;
pub mod session;

pub use config::CoordinatorConfig;
pub use error::{CommandError, ConfigError};
pub use note::Note;
pub use session::{CheckinSession, Couple};
