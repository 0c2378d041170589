//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use rd_encode::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> rd_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-show_entries").arg("format=duration")
///     .arg("/path/to/video.mov")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<OsString>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<OsString>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`rd_core::Error::TimedOut`] if the process exceeds the timeout. The
    ///   child is killed.
    /// - [`rd_core::Error::Tool`] if the process exits with a non-zero status
    ///   (message includes stderr) or cannot be spawned.
    pub async fn execute(&self) -> rd_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| rd_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                rd_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
            Err(_elapsed) => return Err(rd_core::Error::TimedOut(self.timeout)),
        };

        let tool_output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(rd_core::Error::tool(
                program_name,
                format!(
                    "exited with status {}: {}",
                    output.status,
                    tool_output.stderr.trim()
                ),
            ));
        }

        Ok(tool_output)
    }

    /// Execute the command, streaming stderr line by line to `on_line`.
    ///
    /// `on_line` returns `true` when it consumed the line (for example a
    /// progress report); unconsumed lines are kept as diagnostics and the
    /// last few are included in the error on a non-zero exit. Stdout is
    /// discarded.
    ///
    /// The child is killed when `cancel` fires or the timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`rd_core::Error::Cancelled`] when `cancel` fires first.
    /// - [`rd_core::Error::TimedOut`] when the timeout elapses first.
    /// - [`rd_core::Error::Tool`] on spawn failure or non-zero exit.
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str) -> bool + Send,
        cancel: &CancellationToken,
    ) -> rd_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| rd_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| rd_core::Error::tool(&program_name, "stderr was not captured"))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut keep = |line: String, tail: &mut VecDeque<String>| {
            if !on_line(&line) {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        let mut stderr_open = true;

        let status = loop {
            tokio::select! {
                line = lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => keep(line, &mut tail),
                    Ok(None) | Err(_) => stderr_open = false,
                },
                status = child.wait() => {
                    break status.map_err(|e| {
                        rd_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
                    })?;
                }
                _ = cancel.cancelled() => {
                    kill(&mut child, &program_name).await;
                    return Err(rd_core::Error::Cancelled);
                }
                _ = &mut deadline => {
                    kill(&mut child, &program_name).await;
                    return Err(rd_core::Error::TimedOut(self.timeout));
                }
            }
        };

        // Pick up whatever the process wrote just before exiting.
        while stderr_open {
            match lines.next_line().await {
                Ok(Some(line)) => keep(line, &mut tail),
                Ok(None) | Err(_) => stderr_open = false,
            }
        }

        let stderr = Vec::from(tail).join("\n");
        if !status.success() {
            return Err(rd_core::Error::tool(
                program_name,
                format!("exited with status {status}: {}", stderr.trim()),
            ));
        }

        Ok(ToolOutput {
            status,
            stdout: String::new(),
            stderr,
        })
    }
}

async fn kill(child: &mut Child, program_name: &str) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(tool = program_name, "kill failed (already exited?): {e}");
    }
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert_matches!(result, Err(rd_core::Error::Tool { .. }));
    }

    #[tokio::test]
    async fn timeout_fires() {
        // `sleep 10` should be killed well before 10 seconds.
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert_matches!(result, Err(rd_core::Error::TimedOut(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_lines_are_streamed() {
        let mut seen = Vec::new();
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo progress=1 >&2; echo warning >&2"])
            .execute_with_stderr_callback(
                |line| {
                    seen.push(line.to_string());
                    line.starts_with("progress=")
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(seen, vec!["progress=1", "warning"]);
        assert_eq!(result.stderr, "warning");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_includes_stderr_tail() {
        let result = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo 'encoder crashed' >&2; exit 3"])
            .execute_with_stderr_callback(|_| false, &CancellationToken::new())
            .await;

        let err = result.unwrap_err();
        assert_matches!(err, rd_core::Error::Tool { .. });
        assert!(err.to_string().contains("encoder crashed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .execute_with_stderr_callback(|_| false, &cancel)
            .await;

        assert_matches!(result, Err(rd_core::Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute_with_stderr_callback(|_| false, &CancellationToken::new())
            .await;
        assert_matches!(result, Err(rd_core::Error::TimedOut(_)));
    }
}
