//! rd-store: job state and persistence.
//!
//! [`JobStore`] is the single source of truth for job and task status. Every
//! mutation goes through it; reads return copies. An optional
//! [`JobRepository`] mirrors each committed state to durable storage, with
//! [`SqliteJobRepository`] as the SQLite-backed implementation.

pub mod migrations;
pub mod pool;
pub mod repository;
pub mod store;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool};
pub use repository::{JobRepository, SqliteJobRepository};
pub use store::{JobFilter, JobStore};
