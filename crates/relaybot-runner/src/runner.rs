//! External process execution with a deadline and cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaybot_config::{RunnerConfig, expand_home};
use relaybot_types::{ExecutionError, ExecutionResult};

use crate::classify::classify_failure;

/// How long to wait for the output pipes to drain after the process exits.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs one prompt to completion. Implementations never return `Err`:
/// every failure is reported through [`ExecutionResult`].
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn run(&self, prompt: &str, job_id: &str, working_dir: Option<&Path>) -> ExecutionResult;
}

struct ActiveProcess {
    job_id: String,
    cancel: CancellationToken,
}

/// Spawns the configured command once per job.
pub struct ProcessRunner {
    config: RunnerConfig,
    current: std::sync::Mutex<Option<ActiveProcess>>,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            current: std::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveProcess>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.slot().is_some()
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.slot().as_ref().map(|p| p.job_id.clone())
    }

    /// Terminate the running process, if any. Returns whether one was running.
    pub fn cancel_current(&self) -> bool {
        match self.slot().take() {
            Some(active) => {
                info!(job_id = %active.job_id, "Cancelling running process");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the slot only if it still belongs to `job_id`.
    fn release(&self, job_id: &str) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|p| p.job_id == job_id) {
            *slot = None;
        }
    }

    fn working_dir(&self, override_dir: Option<&Path>) -> PathBuf {
        match override_dir {
            Some(dir) => expand_home(&dir.to_string_lossy()),
            None => expand_home(&self.config.working_dir),
        }
    }
}

/// Command-line arguments for one prompt.
pub fn build_args(config: &RunnerConfig, prompt: &str) -> Vec<String> {
    let mut args: Vec<String> = config
        .args
        .iter()
        .map(|a| a.replace("{prompt}", prompt))
        .collect();
    if !config.disallowed_tools.is_empty() {
        args.push(config.disallowed_tools_flag.clone());
        args.extend(config.disallowed_tools.iter().cloned());
    }
    args
}

fn spawn_reader<R>(reader: Option<R>, buf: SharedBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("Output pipe read failed: {e}");
                    break;
                }
            }
        }
    })
}

/// Wait up to `grace` for both readers to reach EOF. Readers still blocked
/// afterwards (a leftover grandchild holding the pipe) are aborted.
async fn drain_readers(
    stdout: &mut JoinHandle<()>,
    stderr: &mut JoinHandle<()>,
    grace: Duration,
) -> bool {
    let drained = tokio::time::timeout(grace, async {
        let _ = (&mut *stdout).await;
        let _ = (&mut *stderr).await;
    })
    .await
    .is_ok();
    if !drained {
        stdout.abort();
        stderr.abort();
    }
    drained
}

async fn snapshot(buf: &SharedBuf) -> String {
    String::from_utf8_lossy(&buf.lock().await).into_owned()
}

#[async_trait]
impl JobExecutor for ProcessRunner {
    async fn run(&self, prompt: &str, job_id: &str, working_dir: Option<&Path>) -> ExecutionResult {
        let cwd = self.working_dir(working_dir);
        let mut cmd = Command::new(&self.config.command);
        cmd.args(build_args(&self.config, prompt))
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &self.config.env_remove {
            cmd.env_remove(var);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id, command = %self.config.command, cwd = %cwd.display(), "Failed to spawn process: {e}");
                return ExecutionResult::failure("", ExecutionError::Spawn(e.to_string()));
            }
        };

        let cancel = CancellationToken::new();
        *self.slot() = Some(ActiveProcess {
            job_id: job_id.to_string(),
            cancel: cancel.clone(),
        });
        info!(job_id, pid = ?child.id(), cwd = %cwd.display(), "Process started");
        let started = Instant::now();

        let stdout: SharedBuf = Arc::default();
        let stderr: SharedBuf = Arc::default();
        let mut stdout_task = spawn_reader(child.stdout.take(), stdout.clone());
        let mut stderr_task = spawn_reader(child.stderr.take(), stderr.clone());

        let deadline = Duration::from_millis(self.config.timeout_ms);
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };
        self.release(job_id);
        let timed_out = matches!(outcome, Outcome::TimedOut);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Exited(status) => {
                if !drain_readers(&mut stdout_task, &mut stderr_task, PIPE_DRAIN_GRACE).await {
                    debug!(job_id, "Output pipes still open after exit, readers aborted");
                }
                let out = snapshot(&stdout).await.trim().to_string();
                match status {
                    Ok(status) if status.success() => {
                        info!(job_id, elapsed_ms, "Process finished");
                        ExecutionResult::success(out)
                    }
                    Ok(status) => {
                        let err = classify_failure(&snapshot(&stderr).await, status.code());
                        warn!(job_id, elapsed_ms, code = ?status.code(), "Process failed: {err}");
                        ExecutionResult::failure(out, err)
                    }
                    Err(e) => {
                        warn!(job_id, "Failed to wait for process: {e}");
                        ExecutionResult::failure(out, ExecutionError::Spawn(e.to_string()))
                    }
                }
            }
            Outcome::TimedOut | Outcome::Cancelled => {
                if let Err(e) = child.kill().await {
                    debug!(job_id, "Kill after stop failed: {e}");
                }
                stdout_task.abort();
                stderr_task.abort();
                let partial = snapshot(&stdout).await;
                if timed_out {
                    warn!(job_id, timeout_ms = self.config.timeout_ms, "Process timed out");
                    ExecutionResult::failure(partial, ExecutionError::TimedOut)
                } else {
                    info!(job_id, elapsed_ms, "Process cancelled");
                    ExecutionResult::failure(partial, ExecutionError::Cancelled)
                }
            }
        }
    }
}
