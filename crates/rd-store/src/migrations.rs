//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.

use rd_core::{Error, Result};
use rusqlite::Connection;

/// V1: jobs table. Tasks are embedded as a JSON array since they are always
/// read and written together with their job.
const V1_INITIAL: &str = r#"
CREATE TABLE jobs (
    id         TEXT PRIMARY KEY,
    asset_id   TEXT NOT NULL,
    owner      TEXT NOT NULL,
    status     TEXT NOT NULL,
    tasks      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_jobs_owner ON jobs(owner);
CREATE INDEX idx_jobs_asset ON jobs(asset_id);
CREATE INDEX idx_jobs_status ON jobs(status);
"#;

/// Ordered list of all migrations.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each migration whose version has not yet been recorded.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::store(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(Error::store)?;

        if already {
            continue;
        }

        let tx = conn.unchecked_transaction().map_err(Error::store)?;

        tx.execute_batch(sql)
            .map_err(|e| Error::store(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(Error::store)?;

        tx.commit().map_err(Error::store)?;
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
