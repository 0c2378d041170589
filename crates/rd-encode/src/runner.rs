//! The contract between the orchestrator and whatever performs an encode.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rd_core::{FormatProfile, JobId};

/// Sender for reporting progress from within a runner.
///
/// Wraps a callback that receives the fraction of the encode completed
/// (0.0 -- 1.0).
pub struct ProgressSender {
    callback: Box<dyn Fn(f32) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f32) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, fraction: f32) {
        (self.callback)(fraction);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// What to encode and where to put it.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub job_id: JobId,
    /// Source media on disk.
    pub source: PathBuf,
    /// Output path chosen by the orchestrator; unique per (job, profile).
    pub output: PathBuf,
    pub profile: FormatProfile,
}

/// Context passed to every runner invocation.
pub struct EncodeContext {
    /// Fired when the job is cancelled or the task deadline elapses. Runners
    /// must stop promptly and return [`rd_core::Error::Cancelled`].
    pub cancellation: CancellationToken,
    /// Channel for reporting progress to the caller.
    pub progress: Arc<ProgressSender>,
}

impl EncodeContext {
    /// Create a new context with a fresh token and a no-op progress sender.
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            progress: Arc::new(ProgressSender::noop()),
        }
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Arc::new(progress);
        self
    }
}

impl Default for EncodeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs one `(source, profile)` encode.
///
/// Implementations report exactly one result per call: the path of the
/// finished output, or an error. An error leaves no partial output at
/// `request.output`.
#[async_trait]
pub trait EncodeRunner: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run the encode to completion, failure or cancellation.
    async fn run(&self, request: &EncodeRequest, ctx: &EncodeContext) -> rd_core::Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn progress_sender_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sender = ProgressSender::new(move |p| sink.lock().unwrap().push(p));
        sender.send(0.25);
        sender.send(0.5);
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5]);
    }

    #[test]
    fn context_builders() {
        let token = CancellationToken::new();
        let ctx = EncodeContext::new().with_cancellation(token.clone());
        token.cancel();
        assert!(ctx.cancellation.is_cancelled());
        ctx.progress.send(0.1);
    }
}
