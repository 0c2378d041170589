//! One worker per task attempt.

use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use rd_core::{Error, FormatProfile, JobId, Result, TaskOutcome};
use rd_encode::{remove_partial_output, EncodeContext, EncodeRequest, EncodeRunner, ProgressSender};

use super::collector::{Report, TaskEvent, TaskEventKind};

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone)]
pub(crate) struct TaskSpec {
    pub job_id: JobId,
    pub profile: FormatProfile,
    pub attempt: u32,
    pub source: PathBuf,
    pub output: PathBuf,
    /// Deadline for the encode, once it holds a permit.
    pub timeout: Option<Duration>,
    /// How long a runner may take to stop after being cancelled.
    pub grace: Duration,
}

/// Shared handles a worker reports through.
#[derive(Clone)]
pub(crate) struct WorkerHandles {
    pub runner: Arc<dyn EncodeRunner>,
    pub permits: Arc<Semaphore>,
    pub reports: mpsc::UnboundedSender<Report>,
}

impl WorkerHandles {
    fn send(&self, spec: &TaskSpec, kind: TaskEventKind) {
        let event = TaskEvent {
            job_id: spec.job_id,
            profile: spec.profile.name.clone(),
            attempt: spec.attempt,
            kind,
        };
        if self.reports.send(Report::Task(event)).is_err() {
            tracing::warn!(job_id = %spec.job_id, profile = %spec.profile.name, "Report collector is gone");
        }
    }
}

/// Run one attempt to completion and report its outcome exactly once.
pub(crate) async fn run_task(handles: WorkerHandles, spec: TaskSpec, cancel: CancellationToken) {
    let outcome = execute(&handles, &spec, &cancel).await;
    if let TaskOutcome::Failed { kind, detail } = &outcome {
        tracing::warn!(
            job_id = %spec.job_id,
            profile = %spec.profile.name,
            attempt = spec.attempt,
            ?kind,
            "Task failed: {detail}"
        );
    }
    handles.send(&spec, TaskEventKind::Finished(outcome));
}

async fn execute(handles: &WorkerHandles, spec: &TaskSpec, cancel: &CancellationToken) -> TaskOutcome {
    // Queued until a permit frees up; cancellation wins ties.
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return TaskOutcome::cancelled(),
        permit = handles.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::failed("worker pool closed"),
        },
    };

    handles.send(spec, TaskEventKind::Started);

    let result = encode(handles, spec, cancel).await;
    TaskOutcome::from_result(result)
}

async fn encode(
    handles: &WorkerHandles,
    spec: &TaskSpec,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let task_token = cancel.child_token();
    let progress = {
        let reports = handles.reports.clone();
        let (job_id, profile, attempt) = (spec.job_id, spec.profile.name.clone(), spec.attempt);
        ProgressSender::new(move |fraction| {
            let _ = reports.send(Report::Task(TaskEvent {
                job_id,
                profile: profile.clone(),
                attempt,
                kind: TaskEventKind::Progress(fraction),
            }));
        })
    };
    let ctx = EncodeContext::new()
        .with_cancellation(task_token.clone())
        .with_progress(progress);
    let request = EncodeRequest {
        job_id: spec.job_id,
        source: spec.source.clone(),
        output: spec.output.clone(),
        profile: spec.profile.clone(),
    };

    let mut run = handles.runner.run(&request, &ctx);
    let deadline = async {
        match spec.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    tokio::select! {
        result = &mut run => result,
        _ = cancel.cancelled() => {
            wind_down(&mut run, spec).await;
            Err(Error::Cancelled)
        }
        _ = &mut deadline => {
            let limit = spec.timeout.unwrap_or_default();
            tracing::warn!(
                job_id = %spec.job_id,
                profile = %spec.profile.name,
                "Task exceeded its {limit:?} deadline; cancelling"
            );
            task_token.cancel();
            wind_down(&mut run, spec).await;
            Err(Error::TimedOut(limit))
        }
    }
}

/// Give a cancelled runner the grace period to stop, then drop it.
///
/// Whatever the runner produced in the meantime is discarded so that a
/// failed task never leaves an output behind.
async fn wind_down<F>(run: F, spec: &TaskSpec)
where
    F: std::future::Future<Output = Result<PathBuf>> + Unpin,
{
    match tokio::time::timeout(spec.grace, run).await {
        Ok(Ok(path)) => remove_partial_output(&path).await,
        Ok(Err(_)) => {}
        Err(_) => tracing::warn!(
            job_id = %spec.job_id,
            profile = %spec.profile.name,
            "Runner ignored cancellation for {:?}; abandoning it",
            spec.grace
        ),
    }
}
