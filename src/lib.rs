//! renditiond - transcoding job orchestrator
//!
//! Turns one uploaded source asset into a set of renditions, tracking each
//! encode as a task and the whole request as a job. This library crate
//! exposes the orchestrator for the binary and for integration testing.

pub mod assets;
pub mod config;
pub mod orchestrator;
pub mod query;

pub use assets::{AssetCatalog, AssetResolver};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use query::JobQuery;
