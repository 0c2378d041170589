//! Single consumer of worker reports.
//!
//! Workers never touch the store directly. They send [`TaskEvent`]s over an
//! unbounded channel and this task applies them one at a time, so each
//! job's aggregate status is recomputed exactly once per report regardless
//! of the order in which tasks finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use rd_core::events::{EventBus, EventPayload};
use rd_core::{Error, JobId, Result, TaskOutcome, TaskTransition, Transition};
use rd_store::JobStore;

/// Extra attempts at saving a task result before keeping it in memory only.
const SAVE_RETRIES: u32 = 4;
/// Delay before the first retry; doubled after each one.
const SAVE_BACKOFF: Duration = Duration::from_millis(50);

/// A report from one task attempt.
#[derive(Debug, Clone)]
pub(crate) struct TaskEvent {
    pub job_id: JobId,
    pub profile: String,
    pub attempt: u32,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone)]
pub(crate) enum TaskEventKind {
    /// The worker holds a permit and is about to invoke the runner.
    Started,
    /// Fraction of the encode done.
    Progress(f32),
    /// The attempt is over. Sent exactly once per attempt.
    Finished(TaskOutcome),
}

/// Messages accepted by the collector.
#[derive(Debug)]
pub(crate) enum Report {
    Task(TaskEvent),
    /// Acknowledged once every report queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

pub(crate) async fn run(
    mut rx: mpsc::UnboundedReceiver<Report>,
    store: Arc<JobStore>,
    bus: Arc<EventBus>,
) {
    while let Some(report) = rx.recv().await {
        match report {
            Report::Task(event) => apply(&store, &bus, event).await,
            Report::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Task report collector stopped");
}

async fn apply(store: &JobStore, bus: &EventBus, event: TaskEvent) {
    let TaskEvent {
        job_id,
        profile,
        attempt,
        kind,
    } = event;

    match kind {
        TaskEventKind::Started => {
            match store.transition_task(job_id, &profile, TaskTransition::Start { attempt }) {
                Ok(t) if t.is_applied() => {
                    tracing::info!(job_id = %job_id, profile = %profile, attempt, "Task started");
                    bus.broadcast(EventPayload::TaskStarted {
                        job_id,
                        profile,
                        attempt,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job_id = %job_id, profile = %profile, "Failed to record task start: {e}")
                }
            }
        }
        TaskEventKind::Progress(progress) => {
            if let Ok(true) = store.record_progress(job_id, &profile, attempt, progress) {
                bus.broadcast(EventPayload::TaskProgress {
                    job_id,
                    profile,
                    progress,
                });
            }
        }
        TaskEventKind::Finished(outcome) => {
            let payload = match &outcome {
                TaskOutcome::Succeeded { output_path } => EventPayload::TaskSucceeded {
                    job_id,
                    profile: profile.clone(),
                    output_path: output_path.clone(),
                },
                TaskOutcome::Failed { kind, detail } => EventPayload::TaskFailed {
                    job_id,
                    profile: profile.clone(),
                    kind: *kind,
                    error: detail.clone(),
                },
            };

            let transition = TaskTransition::Finish { attempt, outcome };
            match record_result(store, job_id, &profile, transition).await {
                Ok(Transition::Applied { to, job_status, .. }) => {
                    tracing::info!(
                        job_id = %job_id,
                        profile = %profile,
                        attempt,
                        status = ?to,
                        "Task finished"
                    );
                    bus.broadcast(payload);

                    if job_status.is_terminal() {
                        tracing::info!(job_id = %job_id, status = %job_status, "Job finished");
                        bus.broadcast(EventPayload::JobFinished {
                            job_id,
                            status: job_status,
                        });
                    }
                }
                // The store already logged why.
                Ok(Transition::Ignored(_)) => {}
                Err(e) => {
                    tracing::error!(job_id = %job_id, profile = %profile, "Failed to record task result: {e}")
                }
            }
        }
    }
}

/// Apply a task result, retrying while the repository refuses the save.
///
/// The worker that produced the result is gone, so it must not be dropped.
/// Once the retries run out the result is committed in memory only and the
/// store reports the job as unsaved to anyone waiting on it.
async fn record_result(
    store: &JobStore,
    job_id: JobId,
    profile: &str,
    transition: TaskTransition,
) -> Result<Transition> {
    let mut delay = SAVE_BACKOFF;
    let mut retries = 0;
    loop {
        match store.transition_task(job_id, profile, transition.clone()) {
            Err(e @ Error::Store { .. }) if retries < SAVE_RETRIES => {
                retries += 1;
                tracing::warn!(
                    job_id = %job_id,
                    profile,
                    retries,
                    "Saving task result failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e @ Error::Store { .. }) => {
                return store.commit_unpersisted(job_id, profile, transition, &e.to_string());
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rd_core::{Asset, JobStatus, ProfileSet, TaskStatus, UserId};
    use std::path::PathBuf;

    fn event(job_id: JobId, profile: &str, kind: TaskEventKind) -> TaskEvent {
        TaskEvent {
            job_id,
            profile: profile.to_string(),
            attempt: 1,
            kind,
        }
    }

    #[tokio::test]
    async fn finish_broadcasts_task_and_job_events() {
        let store = JobStore::in_memory();
        let bus = EventBus::default();
        let asset = Asset::new(UserId::new(), PathBuf::from("/src.mov"));
        let profiles = ProfileSet::new(vec![rd_core::FormatProfile::new("360p", 640, 360)]).unwrap();
        let job = store.create_job(&asset, &profiles).unwrap();
        let mut rx = bus.subscribe();

        apply(&store, &bus, event(job.id, "360p", TaskEventKind::Started)).await;
        apply(&store, &bus, event(job.id, "360p", TaskEventKind::Progress(0.5))).await;
        apply(
            &store,
            &bus,
            event(
                job.id,
                "360p",
                TaskEventKind::Finished(TaskOutcome::Succeeded {
                    output_path: PathBuf::from("/out/360p.mp4"),
                }),
            ),
        )
        .await;

        let kinds: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| serde_json::to_value(&e.payload).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            kinds,
            vec!["task_started", "task_progress", "task_succeeded", "job_finished"]
        );
        assert_eq!(store.get_job(job.id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_finish_is_not_broadcast() {
        let store = JobStore::in_memory();
        let bus = EventBus::default();
        let asset = Asset::new(UserId::new(), PathBuf::from("/src.mov"));
        let job = store.create_job(&asset, &ProfileSet::standard()).unwrap();

        let failed = || TaskEventKind::Finished(TaskOutcome::failed("encoder crashed"));
        apply(&store, &bus, event(job.id, "720p", failed())).await;
        let mut rx = bus.subscribe();
        apply(&store, &bus, event(job.id, "720p", failed())).await;

        assert!(rx.try_recv().is_err());
        let job = store.get_job(job.id).unwrap();
        assert_eq!(job.task("720p").unwrap().status, TaskStatus::Failed);
        assert_eq!(job.counts.failed, 1);
    }
}
