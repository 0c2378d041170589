//! In-memory job state with optional write-through persistence.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use rd_core::{
    Asset, AssetId, Error, IgnoreReason, Job, JobId, JobStatus, ProfileSet, Result, TaskTransition,
    Transition, UserId,
};

use crate::repository::JobRepository;

/// Detail recorded on tasks that were still open when a previous process
/// exited.
pub const INTERRUPTED_DETAIL: &str = "interrupted by restart";

/// Criteria for [`JobStore::list_jobs`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub owner: Option<UserId>,
    pub asset_id: Option<AssetId>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn owner(owner: UserId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner.map_or(true, |o| job.owner == o)
            && self.asset_id.map_or(true, |a| job.asset_id == a)
            && self.status.map_or(true, |s| job.status == s)
    }
}

/// Authoritative record of every job and task status.
///
/// Each job sits behind its own mutex, so transitions on one job are
/// serialized while different jobs proceed independently. A transition is
/// applied to a copy, persisted, and only then committed; a persistence
/// failure therefore leaves the last consistent state in place.
///
/// The one exception is [`commit_unpersisted`](Self::commit_unpersisted),
/// used when a task result could not be saved at all. The job is then
/// flagged until a later save succeeds, and
/// [`wait_for_terminal`](Self::wait_for_terminal) reports the failure.
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
    repo: Option<Arc<dyn JobRepository>>,
    /// Jobs whose in-memory state is ahead of the repository, with the
    /// last save error.
    unsynced: Mutex<HashMap<JobId, String>>,
    changed: Notify,
}

impl JobStore {
    /// A store that keeps jobs in memory only.
    pub fn in_memory() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            repo: None,
            unsynced: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    /// A store that writes every committed change through to `repo`.
    pub fn with_repository(repo: Arc<dyn JobRepository>) -> Self {
        Self {
            repo: Some(repo),
            ..Self::in_memory()
        }
    }

    fn persist(&self, job: &Job) -> Result<()> {
        match &self.repo {
            Some(repo) => repo.save(job),
            None => Ok(()),
        }
    }

    fn entry(&self, job_id: JobId) -> Result<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// Create a job with one queued task per profile.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `profiles` is empty.
    /// - [`Error::Store`] if the job could not be persisted; nothing is
    ///   recorded in that case.
    pub fn create_job(&self, asset: &Asset, profiles: &ProfileSet) -> Result<Job> {
        if profiles.is_empty() {
            return Err(Error::invalid_input("at least one profile is required"));
        }

        let job = Job::new(asset, profiles);
        self.persist(&job)?;
        self.jobs
            .write()
            .insert(job.id, Arc::new(Mutex::new(job.clone())));

        tracing::debug!(job_id = %job.id, asset_id = %asset.id, tasks = job.tasks.len(), "Job created");
        self.changed.notify_waiters();
        Ok(job)
    }

    /// Apply a transition to one task and recompute the job status.
    ///
    /// Transitions that would leave a terminal status, or that belong to a
    /// superseded attempt, are ignored and reported as
    /// [`Transition::Ignored`].
    pub fn transition_task(
        &self,
        job_id: JobId,
        profile: &str,
        transition: TaskTransition,
    ) -> Result<Transition> {
        let entry = self.entry(job_id)?;
        let mut job = entry.lock();

        let mut next = job.clone();
        let result = next.apply(profile, transition)?;

        match result {
            Transition::Applied { from, to, job_status } => {
                self.persist(&next)?;
                *job = next;
                drop(job);
                if self.repo.is_some() {
                    self.unsynced.lock().remove(&job_id);
                }

                tracing::debug!(
                    job_id = %job_id,
                    profile,
                    ?from,
                    ?to,
                    job_status = %job_status,
                    "Task transition applied"
                );
                self.changed.notify_waiters();
            }
            Transition::Ignored(IgnoreReason::AlreadyTerminal(status)) => {
                tracing::warn!(
                    job_id = %job_id,
                    profile,
                    ?status,
                    "Discarding report for task already in a terminal state"
                );
            }
            Transition::Ignored(reason) => {
                tracing::debug!(job_id = %job_id, profile, ?reason, "Transition ignored");
            }
        }

        Ok(result)
    }

    /// Apply a transition in memory after saving it has failed for good.
    ///
    /// Only meant for task results: dropping one would leave the task
    /// running with no worker behind it. The job stays flagged with
    /// `reason` until a later save of it succeeds.
    pub fn commit_unpersisted(
        &self,
        job_id: JobId,
        profile: &str,
        transition: TaskTransition,
        reason: &str,
    ) -> Result<Transition> {
        let entry = self.entry(job_id)?;
        let result = entry.lock().apply(profile, transition)?;

        if let Transition::Applied { to, job_status, .. } = result {
            self.unsynced.lock().insert(job_id, reason.to_string());
            tracing::error!(
                job_id = %job_id,
                profile,
                ?to,
                job_status = %job_status,
                "Task result kept in memory only: {reason}"
            );
            self.changed.notify_waiters();
        }
        Ok(result)
    }

    /// The last save error of a job whose state has not reached the
    /// repository, if any.
    pub fn unsynced_reason(&self, job_id: JobId) -> Option<String> {
        self.unsynced.lock().get(&job_id).cloned()
    }

    /// Record encode progress for a running task. Not persisted.
    pub fn record_progress(
        &self,
        job_id: JobId,
        profile: &str,
        attempt: u32,
        fraction: f32,
    ) -> Result<bool> {
        let entry = self.entry(job_id)?;
        let updated = entry.lock().record_progress(profile, attempt, fraction);
        Ok(updated)
    }

    /// A snapshot of one job.
    pub fn get_job(&self, job_id: JobId) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let job = entry.lock().clone();
        Ok(job)
    }

    /// Snapshots of all jobs matching `filter`, oldest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = self.jobs.read().values().cloned().collect();
        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|e| e.lock().clone())
            .filter(|j| filter.matches(j))
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Take over jobs saved by a previous process.
    ///
    /// No worker survives a restart, so every task that was still queued or
    /// running is failed with [`INTERRUPTED_DETAIL`] and saved back. Only
    /// call this from the process that owns the database; use
    /// [`load_snapshot`](Self::load_snapshot) to merely look. Returns the
    /// number of tasks interrupted.
    pub fn restore(&self, jobs: Vec<Job>) -> Result<usize> {
        let mut interrupted = 0;
        let mut restored = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            let n = job.interrupt_unfinished(INTERRUPTED_DETAIL);
            if n > 0 {
                tracing::warn!(job_id = %job.id, tasks = n, "Marking interrupted tasks as failed");
                self.persist(&job)?;
                interrupted += n;
            }
            restored.push(job);
        }

        {
            let mut map = self.jobs.write();
            for job in restored {
                map.insert(job.id, Arc::new(Mutex::new(job)));
            }
        }

        self.changed.notify_waiters();
        Ok(interrupted)
    }

    /// Restore everything the attached repository holds. A store without a
    /// repository restores nothing.
    pub fn load_from_repository(&self) -> Result<usize> {
        let Some(repo) = &self.repo else {
            return Ok(0);
        };
        let jobs = repo.load_all()?;
        let count = jobs.len();
        let interrupted = self.restore(jobs)?;
        tracing::info!(jobs = count, interrupted, "Restored jobs from storage");
        Ok(count)
    }

    /// Load every saved job exactly as stored, without taking ownership.
    ///
    /// Open tasks are left alone and nothing is written back, so this is
    /// safe while another process is still working on the same database.
    pub fn load_snapshot(&self) -> Result<usize> {
        let Some(repo) = &self.repo else {
            return Ok(0);
        };
        let jobs = repo.load_all()?;
        let count = jobs.len();
        {
            let mut map = self.jobs.write();
            for job in jobs {
                map.insert(job.id, Arc::new(Mutex::new(job)));
            }
        }
        self.changed.notify_waiters();
        Ok(count)
    }

    /// Wait until the job reaches a terminal status and return it.
    ///
    /// A job that is retried after finishing becomes non-terminal again;
    /// callers waiting across a retry should call this again.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] if the job finished but its final state could not be
    /// saved.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<Job> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a change in between is not missed.
            notified.as_mut().enable();

            let job = self.get_job(job_id)?;
            if job.is_terminal() {
                if let Some(reason) = self.unsynced_reason(job_id) {
                    return Err(Error::store(format!(
                        "job {job_id} finished but its result was not saved: {reason}"
                    )));
                }
                return Ok(job);
            }
            notified.await;
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("jobs", &self.len())
            .field("persistent", &self.repo.is_some())
            .finish()
    }
}
