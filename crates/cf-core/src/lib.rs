//! cf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other cf-* crates,
//! providing type-safe identifiers, a unified error type, the task and
//! operation enums together with the task state machine, application
//! configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod task;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use task::*;
