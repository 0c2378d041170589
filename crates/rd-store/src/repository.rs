//! Durable job storage.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use rd_core::{Error, Job, JobId, Result, StatusCounts, Task};

use crate::pool::{get_conn, DbPool};

/// Durable mirror of committed job state.
///
/// Implementations must make `save` atomic per job: after an error the
/// previously saved version stays readable.
pub trait JobRepository: Send + Sync {
    /// Insert or replace one job.
    fn save(&self, job: &Job) -> Result<()>;

    /// Load a single job.
    fn load(&self, id: JobId) -> Result<Option<Job>>;

    /// Load every stored job, oldest first.
    fn load_all(&self) -> Result<Vec<Job>>;
}

const COLS: &str = "id, asset_id, owner, status, tasks, created_at, updated_at";

/// [`JobRepository`] backed by the `jobs` table.
#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: DbPool,
}

impl SqliteJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl std::fmt::Debug for SqliteJobRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJobRepository")
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl JobRepository for SqliteJobRepository {
    fn save(&self, job: &Job) -> Result<()> {
        let tasks = serde_json::to_string(&job.tasks).map_err(Error::store)?;
        let conn = get_conn(&self.pool)?;
        conn.execute(
            "INSERT INTO jobs (id, asset_id, owner, status, tasks, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                tasks = excluded.tasks,
                updated_at = excluded.updated_at",
            rusqlite::params![
                job.id.to_string(),
                job.asset_id.to_string(),
                job.owner.to_string(),
                job.status.as_str(),
                tasks,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(Error::store)?;
        Ok(())
    }

    fn load(&self, id: JobId) -> Result<Option<Job>> {
        let conn = get_conn(&self.pool)?;
        let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
        let row = conn
            .query_row(&q, [id.to_string()], JobRow::from_row)
            .optional()
            .map_err(Error::store)?;
        row.map(JobRow::into_job).transpose()
    }

    fn load_all(&self) -> Result<Vec<Job>> {
        let conn = get_conn(&self.pool)?;
        let q = format!("SELECT {COLS} FROM jobs ORDER BY created_at ASC");
        let mut stmt = conn.prepare(&q).map_err(Error::store)?;
        let rows = stmt
            .query_map([], JobRow::from_row)
            .map_err(Error::store)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::store)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// Raw column values for one `jobs` row.
struct JobRow {
    id: String,
    asset_id: String,
    owner: String,
    tasks: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            asset_id: row.get(1)?,
            owner: row.get(2)?,
            // Column 3 (status) is kept for indexing; the status is
            // re-derived from the tasks on load.
            tasks: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let tasks: Vec<Task> = serde_json::from_str(&self.tasks)
            .map_err(|e| Error::store(format!("job {}: corrupt tasks column: {e}", self.id)))?;
        let counts = StatusCounts::from_tasks(&tasks);
        Ok(Job {
            id: parse_id(&self.id)?,
            asset_id: parse_id(&self.asset_id)?,
            owner: parse_id(&self.owner)?,
            status: counts.aggregate(),
            tasks,
            counts,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

fn parse_id<T>(s: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| Error::store(format!("invalid id {s:?}: {e}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::store(format!("invalid timestamp {s:?}: {e}")))
}
