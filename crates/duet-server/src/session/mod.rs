//! Session coordination: store, presence, turns, steps, notes, metrics

pub mod metrics;
pub mod notes;
pub mod presence;
pub mod steps;
pub mod store;
pub mod turn;

pub use store::SessionStore;
