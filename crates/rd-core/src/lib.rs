//! rd-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other rd-* crates,
//! providing type-safe identifiers, a unified error type, format profiles,
//! the job/task data model with its aggregation state machine, requester
//! identity, application configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod ids;
pub mod model;
pub mod profile;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use identity::{Requester, Role};
pub use ids::*;
pub use model::*;
pub use profile::{FormatProfile, ProfileSet};
