//! Job and task data model with the aggregation state machine.
//!
//! A [`Job`] owns one [`Task`] per format profile. Task statuses move
//! `queued -> running -> {succeeded | failed}`; a terminal status is never
//! left except through an explicit [`TaskTransition::Reset`] of a failed task.
//! The job status is derived from a per-status counter table
//! ([`StatusCounts`]) that is shifted once per applied transition, so it is
//! never set independently of the tasks.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{AssetId, JobId, UserId};
use crate::profile::{FormatProfile, ProfileSet};

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// An uploaded source media file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub owner: UserId,
    pub storage_path: PathBuf,
    pub original_name: String,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(owner: UserId, storage_path: PathBuf) -> Self {
        let original_name = storage_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            id: AssetId::new(),
            owner,
            storage_path,
            original_name,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Aggregate status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::invalid_input(format!("unknown job status {other:?}"))),
        }
    }
}

/// Status of a single encode task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Why a failed task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The encode itself failed (unreadable source, nonzero exit, crash).
    Error,
    /// The job was cancelled while the task was queued or running.
    Cancelled,
    /// The task exceeded its deadline.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Outcomes and transitions
// ---------------------------------------------------------------------------

/// Terminal result reported by a task runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded { output_path: PathBuf },
    Failed { kind: FailureKind, detail: String },
}

impl TaskOutcome {
    pub fn failed(detail: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind: FailureKind::Error,
            detail: detail.into(),
        }
    }

    pub fn cancelled() -> Self {
        TaskOutcome::Failed {
            kind: FailureKind::Cancelled,
            detail: "cancelled".into(),
        }
    }

    /// Convert a runner result into an outcome, classifying the error.
    pub fn from_result(result: Result<PathBuf>) -> Self {
        match result {
            Ok(output_path) => TaskOutcome::Succeeded { output_path },
            Err(e) => TaskOutcome::Failed {
                kind: e.failure_kind(),
                detail: e.to_string(),
            },
        }
    }
}

/// A requested change to one task.
///
/// `Start` and `Finish` carry the attempt number they belong to so that
/// reports from a superseded attempt can be discarded after a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    Start { attempt: u32 },
    Finish { attempt: u32, outcome: TaskOutcome },
    /// Put a failed task back to `queued` for another attempt.
    Reset,
}

/// Why a transition was discarded without changing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The task already reached this terminal status; first report wins.
    AlreadyTerminal(TaskStatus),
    /// The task is already running.
    AlreadyRunning,
    /// The report belongs to an earlier attempt.
    StaleAttempt { current: u32, reported: u32 },
}

/// Result of applying a [`TaskTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: TaskStatus,
        to: TaskStatus,
        job_status: JobStatus,
    },
    Ignored(IgnoreReason),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// StatusCounts
// ---------------------------------------------------------------------------

/// Number of tasks in each status; the job status is a function of this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl StatusCounts {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            *counts.slot(task.status) += 1;
        }
        counts
    }

    fn slot(&mut self, status: TaskStatus) -> &mut u32 {
        match status {
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Succeeded => &mut self.succeeded,
            TaskStatus::Failed => &mut self.failed,
        }
    }

    /// Move one task from `from` to `to`.
    pub fn shift(&mut self, from: TaskStatus, to: TaskStatus) {
        let slot = self.slot(from);
        debug_assert!(*slot > 0, "no task in {from:?} to move");
        *slot = slot.saturating_sub(1);
        *self.slot(to) += 1;
    }

    pub fn total(&self) -> u32 {
        self.queued + self.running + self.succeeded + self.failed
    }

    pub fn terminal(&self) -> u32 {
        self.succeeded + self.failed
    }

    /// Derive the job status.
    ///
    /// - every task queued and none running or finished: `pending`
    /// - any task queued or running: `processing`
    /// - all terminal: `completed` / `failed` / `completed_with_errors`
    pub fn aggregate(&self) -> JobStatus {
        if self.terminal() < self.total() {
            if self.running == 0 && self.terminal() == 0 {
                JobStatus::Pending
            } else {
                JobStatus::Processing
            }
        } else if self.total() == 0 {
            JobStatus::Pending
        } else if self.failed == 0 {
            JobStatus::Completed
        } else if self.succeeded == 0 {
            JobStatus::Failed
        } else {
            JobStatus::CompletedWithErrors
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One (job, profile) encode attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub profile: FormatProfile,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt: u32,
    /// Fraction of the encode completed, 0.0 to 1.0. Informational only.
    pub progress: f32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(profile: FormatProfile) -> Self {
        Self {
            profile,
            status: TaskStatus::Queued,
            failure: None,
            output_path: None,
            error: None,
            attempt: 1,
            progress: 0.0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    fn finish(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> TaskStatus {
        self.finished_at = Some(now);
        match outcome {
            TaskOutcome::Succeeded { output_path } => {
                self.status = TaskStatus::Succeeded;
                self.output_path = Some(output_path);
                self.progress = 1.0;
            }
            TaskOutcome::Failed { kind, detail } => {
                self.status = TaskStatus::Failed;
                self.failure = Some(kind);
                self.error = Some(detail);
            }
        }
        self.status
    }

    fn reset(&mut self) {
        self.status = TaskStatus::Queued;
        self.failure = None;
        self.output_path = None;
        self.error = None;
        self.attempt += 1;
        self.progress = 0.0;
        self.started_at = None;
        self.finished_at = None;
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One transcoding request for an asset, owning one task per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub asset_id: AssetId,
    /// Owner of the asset at the time the job was created.
    pub owner: UserId,
    pub status: JobStatus,
    pub tasks: Vec<Task>,
    pub counts: StatusCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job with every task queued.
    pub fn new(asset: &Asset, profiles: &ProfileSet) -> Self {
        let tasks: Vec<Task> = profiles.iter().cloned().map(Task::new).collect();
        let counts = StatusCounts::from_tasks(&tasks);
        let now = Utc::now();
        Self {
            id: JobId::new(),
            asset_id: asset.id,
            owner: asset.owner,
            status: counts.aggregate(),
            tasks,
            counts,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self, profile: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name() == profile)
    }

    fn task_index(&self, profile: &str) -> Result<usize> {
        self.tasks
            .iter()
            .position(|t| t.name() == profile)
            .ok_or_else(|| Error::not_found("task", format!("{}/{profile}", self.id)))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Names of tasks that ended in failure.
    pub fn failed_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Apply one transition to the named task and recompute the job status.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no task has that profile name.
    /// - [`Error::InvalidInput`] when resetting a task that has not failed.
    pub fn apply(&mut self, profile: &str, transition: TaskTransition) -> Result<Transition> {
        let idx = self.task_index(profile)?;
        let now = Utc::now();
        let task = &mut self.tasks[idx];
        let from = task.status;

        let to = match transition {
            TaskTransition::Start { attempt } => {
                if attempt != task.attempt {
                    return Ok(Transition::Ignored(IgnoreReason::StaleAttempt {
                        current: task.attempt,
                        reported: attempt,
                    }));
                }
                match from {
                    TaskStatus::Queued => {
                        task.status = TaskStatus::Running;
                        task.started_at = Some(now);
                        TaskStatus::Running
                    }
                    TaskStatus::Running => {
                        return Ok(Transition::Ignored(IgnoreReason::AlreadyRunning))
                    }
                    terminal => {
                        return Ok(Transition::Ignored(IgnoreReason::AlreadyTerminal(terminal)))
                    }
                }
            }
            TaskTransition::Finish { attempt, outcome } => {
                if attempt != task.attempt {
                    return Ok(Transition::Ignored(IgnoreReason::StaleAttempt {
                        current: task.attempt,
                        reported: attempt,
                    }));
                }
                if from.is_terminal() {
                    return Ok(Transition::Ignored(IgnoreReason::AlreadyTerminal(from)));
                }
                task.finish(outcome, now)
            }
            TaskTransition::Reset => {
                if from != TaskStatus::Failed {
                    return Err(Error::invalid_input(format!(
                        "task {profile} is {from:?}; only failed tasks can be reset"
                    )));
                }
                task.reset();
                TaskStatus::Queued
            }
        };

        self.counts.shift(from, to);
        debug_assert_eq!(self.counts, StatusCounts::from_tasks(&self.tasks));
        self.status = self.counts.aggregate();
        self.updated_at = now;

        Ok(Transition::Applied {
            from,
            to,
            job_status: self.status,
        })
    }

    /// Record encode progress for a running task. Returns `false` when the
    /// report does not match the task's current running attempt.
    pub fn record_progress(&mut self, profile: &str, attempt: u32, fraction: f32) -> bool {
        match self.tasks.iter_mut().find(|t| t.name() == profile) {
            Some(task) if task.status == TaskStatus::Running && task.attempt == attempt => {
                task.progress = fraction.clamp(0.0, 1.0);
                true
            }
            _ => false,
        }
    }

    /// Fail every task still queued or running with the given detail.
    ///
    /// Used when restoring jobs whose workers died with a previous process.
    /// Returns the number of tasks affected.
    pub fn interrupt_unfinished(&mut self, detail: &str) -> usize {
        let pending: Vec<(String, u32)> = self
            .tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| (t.name().to_string(), t.attempt))
            .collect();

        for (name, attempt) in &pending {
            let outcome = TaskOutcome::failed(detail);
            // Only fails on an unknown name, which cannot happen here.
            let _ = self.apply(
                name,
                TaskTransition::Finish {
                    attempt: *attempt,
                    outcome,
                },
            );
        }
        pending.len()
    }
}
