//! Shared test harness for integration tests.
//!
//! Provides [`ScriptedRunner`], an [`EncodeRunner`] whose per-profile
//! behaviour is set up front, and [`TestHarness`], which wires it into a
//! full [`Orchestrator`] with an in-memory store and a temporary output
//! directory.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use rd_core::events::EventBus;
use rd_core::{AssetId, Error, FormatProfile, Job, JobId, Requester, Result, UserId};
use rd_encode::{EncodeContext, EncodeRequest, EncodeRunner};
use rd_store::JobStore;
use renditiond::{AssetCatalog, Orchestrator, OrchestratorSettings};

/// Upper bound on how long any test waits for a job.
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// What the scripted runner does for a profile.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write a small output file after the configured delay.
    Succeed,
    /// Fail with a tool error carrying this message.
    Fail(String),
    /// Fail the first attempt, succeed afterwards.
    FailOnce(String),
    /// Block until cancelled.
    Hang,
    /// Block forever, ignoring cancellation.
    IgnoreCancel,
}

pub struct ScriptedRunner {
    behaviors: HashMap<String, Behavior>,
    default: Behavior,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: Mutex<Vec<String>>,
    failed_once: Mutex<HashSet<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            default: Behavior::Succeed,
            delay: Duration::from_millis(20),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            failed_once: Mutex::new(HashSet::new()),
        }
    }

    /// Runner that applies `behavior` to every profile.
    pub fn all(behavior: Behavior) -> Self {
        Self {
            default: behavior,
            ..Self::new()
        }
    }

    pub fn with(mut self, profile: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(profile.to_string(), behavior);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Highest number of runs observed in flight at once.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Number of runs currently in flight.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Profile names in the order their runs began.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn succeed(&self, request: &EncodeRequest, ctx: &EncodeContext) -> Result<PathBuf> {
        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        ctx.progress.send(0.5);
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output, request.profile.name.as_bytes()).await?;
        ctx.progress.send(1.0);
        Ok(request.output.clone())
    }
}

/// Decrements the in-flight counter even when the run is dropped.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EncodeRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, request: &EncodeRequest, ctx: &EncodeContext) -> Result<PathBuf> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let name = request.profile.name.clone();
        self.calls.lock().push(name.clone());
        let behavior = self
            .behaviors
            .get(&name)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match behavior {
            Behavior::Succeed => self.succeed(request, ctx).await,
            Behavior::Fail(message) => {
                tokio::time::sleep(self.delay).await;
                Err(Error::tool("ffmpeg", message))
            }
            Behavior::FailOnce(message) => {
                let first = self.failed_once.lock().insert(name);
                if first {
                    tokio::time::sleep(self.delay).await;
                    Err(Error::tool("ffmpeg", message))
                } else {
                    self.succeed(request, ctx).await
                }
            }
            Behavior::Hang => {
                ctx.cancellation.cancelled().await;
                Err(Error::Cancelled)
            }
            Behavior::IgnoreCancel => std::future::pending().await,
        }
    }
}

/// A fully wired orchestrator over a scripted runner.
pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<JobStore>,
    pub assets: Arc<AssetCatalog>,
    pub bus: Arc<EventBus>,
    pub runner: Arc<ScriptedRunner>,
    pub orchestrator: Orchestrator,
    pub owner: UserId,
}

impl TestHarness {
    /// Harness with four encode slots and no deadline.
    pub fn new(runner: ScriptedRunner) -> Self {
        Self::with_settings(runner, |_| {})
    }

    pub fn with_settings(runner: ScriptedRunner, f: impl FnOnce(&mut OrchestratorSettings)) -> Self {
        Self::with_store(runner, Arc::new(JobStore::in_memory()), f)
    }

    pub fn with_store(
        runner: ScriptedRunner,
        store: Arc<JobStore>,
        f: impl FnOnce(&mut OrchestratorSettings),
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut settings = OrchestratorSettings {
            max_concurrent_encodes: 4,
            task_timeout: None,
            cancel_grace: Duration::from_secs(1),
            output_dir: dir.path().join("out"),
        };
        f(&mut settings);

        let assets = Arc::new(AssetCatalog::new());
        let bus = Arc::new(EventBus::default());
        let runner = Arc::new(runner);
        let orchestrator = Orchestrator::new(
            settings,
            store.clone(),
            assets.clone(),
            runner.clone(),
            bus.clone(),
        );

        Self {
            dir,
            store,
            assets,
            bus,
            runner,
            orchestrator,
            owner: UserId::new(),
        }
    }

    /// Register a source file owned by the harness user.
    pub fn source(&self) -> AssetId {
        let path = self.dir.path().join(format!("source-{}.mov", AssetId::new()));
        std::fs::write(&path, b"source media").expect("failed to write source");
        self.assets
            .register(self.owner, path)
            .expect("failed to register asset")
            .id
    }

    pub fn requester(&self) -> Requester {
        Requester::user(self.owner)
    }

    /// Wait for a terminal job, failing the test after [`WAIT_LIMIT`].
    pub async fn wait(&self, job_id: JobId) -> Job {
        tokio::time::timeout(WAIT_LIMIT, self.orchestrator.wait_for_job(job_id))
            .await
            .expect("job did not finish in time")
            .expect("job disappeared")
    }

    /// Poll until `n` runs are in flight.
    pub async fn until_running(&self, n: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            while self.runner.running() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("runs did not start in time");
    }
}

/// The standard 360p / 720p / 1080p ladder as a list.
pub fn standard_profiles() -> Vec<FormatProfile> {
    rd_core::ProfileSet::standard().as_slice().to_vec()
}

/// `n` small profiles named `p0`, `p1`, ...
pub fn numbered_profiles(n: usize) -> Vec<FormatProfile> {
    (0..n)
        .map(|i| FormatProfile::new(format!("p{i}"), 320, 240))
        .collect()
}
