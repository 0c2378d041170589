//! Job orchestration.
//!
//! The [`Orchestrator`] accepts transcode requests, creates a job with one
//! task per profile, and fans the tasks out to workers bounded by a global
//! semaphore. Workers report back through a single collector task which is
//! the only writer of task status.

mod collector;
mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use rd_core::config::OrchestratorConfig;
use rd_core::events::{EventBus, EventPayload};
use rd_core::{
    Asset, AssetId, Error, FormatProfile, Job, JobId, ProfileSet, Requester, Result, Transition,
    TaskTransition,
};
use rd_encode::{rendition_path, EncodeRunner};
use rd_store::JobStore;

use crate::assets::AssetResolver;
use collector::Report;
use worker::{TaskSpec, WorkerHandles};

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum encodes running at once across all jobs.
    pub max_concurrent_encodes: usize,
    /// Deadline applied to tasks whose profile sets none.
    pub task_timeout: Option<Duration>,
    /// How long a cancelled runner may keep a task before it is abandoned.
    pub cancel_grace: Duration,
    /// Root of the rendition output tree.
    pub output_dir: PathBuf,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestratorSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrent_encodes: config.max_concurrent_encodes.max(1),
            task_timeout: config.task_timeout(),
            cancel_grace: config.cancel_grace(),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Coordinates jobs from creation to a terminal status.
///
/// Must be created inside a Tokio runtime; the report collector is spawned
/// on construction.
pub struct Orchestrator {
    store: Arc<JobStore>,
    assets: Arc<dyn AssetResolver>,
    handles: WorkerHandles,
    bus: Arc<EventBus>,
    settings: OrchestratorSettings,
    /// One token per job; cancelling it stops every task of that job.
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    /// Parent of every job token.
    shutdown: CancellationToken,
    workers: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        store: Arc<JobStore>,
        assets: Arc<dyn AssetResolver>,
        runner: Arc<dyn EncodeRunner>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(collector::run(rx, store.clone(), bus.clone()));

        tracing::debug!(
            runner = runner.name(),
            max_concurrent_encodes = settings.max_concurrent_encodes,
            "Orchestrator started"
        );

        let handles = WorkerHandles {
            runner,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_encodes.max(1))),
            reports: tx,
        };

        Self {
            store,
            assets,
            handles,
            bus,
            settings,
            tokens: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Start transcoding an asset into the given profiles.
    ///
    /// Returns as soon as the job exists with every task queued; encoding
    /// happens in the background and never fails this call.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `profiles` is empty or invalid. Checked
    ///   before anything else, so no job is created.
    /// - [`Error::NotFound`] if the asset is unknown.
    /// - [`Error::Store`] if the job could not be recorded.
    pub fn start_job(&self, asset_id: AssetId, profiles: Vec<FormatProfile>) -> Result<JobId> {
        let profiles = ProfileSet::new(profiles)?;

        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("orchestrator is shutting down".into()));
        }

        let asset = self.assets.resolve(asset_id)?;
        let job = self.store.create_job(&asset, &profiles)?;
        let token = self.job_token(job.id);

        tracing::info!(
            job_id = %job.id,
            asset_id = %asset.id,
            tasks = job.tasks.len(),
            "Job created for {}",
            asset.original_name
        );
        self.bus.broadcast(EventPayload::JobCreated {
            job_id: job.id,
            asset_id: asset.id,
            tasks: job.tasks.len(),
        });

        for task in &job.tasks {
            self.spawn_task(&job, &asset, task.profile.clone(), task.attempt, token.clone());
        }

        Ok(job.id)
    }

    /// Token for a job, created on first use. A token cancelled by
    /// [`cancel_job`](Self::cancel_job) stays cancelled until a retry
    /// replaces it.
    fn job_token(&self, job_id: JobId) -> CancellationToken {
        self.tokens
            .lock()
            .entry(job_id)
            .or_insert_with(|| self.shutdown.child_token())
            .clone()
    }

    fn spawn_task(
        &self,
        job: &Job,
        asset: &Asset,
        profile: FormatProfile,
        attempt: u32,
        cancel: CancellationToken,
    ) {
        let spec = TaskSpec {
            job_id: job.id,
            output: rendition_path(&self.settings.output_dir, job.id, &profile),
            source: asset.storage_path.clone(),
            timeout: profile
                .timeout_secs
                .map(Duration::from_secs)
                .or(self.settings.task_timeout),
            grace: self.settings.cancel_grace,
            attempt,
            profile,
        };
        self.workers
            .spawn(worker::run_task(self.handles.clone(), spec, cancel));
    }

    /// Stop every queued and running task of a job.
    ///
    /// Cancelled tasks end as failed with the `cancelled` failure kind.
    /// Cancelling a finished or already cancelled job is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] or [`Error::NotAuthorized`].
    pub fn cancel_job(&self, job_id: JobId, requester: &Requester) -> Result<()> {
        let job = self.store.get_job(job_id)?;
        requester.authorize(job.owner)?;

        if job.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Cancel ignored; job already finished");
            return Ok(());
        }

        let token = self.job_token(job_id);
        if !token.is_cancelled() {
            token.cancel();
            tracing::info!(job_id = %job_id, user_id = %requester.user_id, "Job cancelled");
            self.bus.broadcast(EventPayload::JobCancelled { job_id });
        }
        Ok(())
    }

    /// Put every failed task of a job back in the queue for another
    /// attempt. Succeeded and in-flight tasks are left alone.
    ///
    /// Returns the names of the tasks that were requeued.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] or [`Error::NotAuthorized`].
    pub fn retry_failed(&self, job_id: JobId, requester: &Requester) -> Result<Vec<String>> {
        let job = self.store.get_job(job_id)?;
        requester.authorize(job.owner)?;

        let failed = job.failed_tasks();
        if failed.is_empty() {
            return Ok(Vec::new());
        }
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("orchestrator is shutting down".into()));
        }

        let asset = self.assets.resolve(job.asset_id)?;
        let token = {
            let mut tokens = self.tokens.lock();
            let token = tokens
                .entry(job_id)
                .or_insert_with(|| self.shutdown.child_token());
            if token.is_cancelled() {
                *token = self.shutdown.child_token();
            }
            token.clone()
        };

        let mut retried = Vec::new();
        for name in failed {
            match self.store.transition_task(job_id, &name, TaskTransition::Reset) {
                Ok(Transition::Applied { .. }) => {}
                Ok(Transition::Ignored(_)) | Err(Error::InvalidInput(_)) => continue,
                Err(e) => return Err(e),
            }

            let job = self.store.get_job(job_id)?;
            let Some(task) = job.task(&name) else {
                continue;
            };
            let (profile, attempt) = (task.profile.clone(), task.attempt);

            tracing::info!(job_id = %job_id, profile = %name, attempt, "Retrying task");
            self.bus.broadcast(EventPayload::TaskRetried {
                job_id,
                profile: name.clone(),
                attempt,
            });
            self.spawn_task(&job, &asset, profile, attempt, token.clone());
            retried.push(name);
        }

        Ok(retried)
    }

    /// Wait until the job reaches a terminal status and return it.
    pub async fn wait_for_job(&self, job_id: JobId) -> Result<Job> {
        self.store.wait_for_terminal(job_id).await
    }

    /// Wait until every report sent so far has been applied to the store.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.handles.reports.send(Report::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Cancel all in-flight work and wait for every worker to report.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.shutdown.cancel();
        self.workers.close();
        self.workers.wait().await;
        self.flush().await;
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("workers", &self.workers.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
