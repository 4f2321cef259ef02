use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use forgeloop_schemas::sandbox::{SandboxId, SandboxState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{instrument, warn};

use crate::error::CommandError;

/// A command exits with this code when the sandbox kills it for running past
/// its timeout. Mirrors the `timeout(1)` convention so logs read familiarly.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Distinguished exit code used when `cancel()` was observed before the
/// command could start.
pub const CANCELLED_EXIT_CODE: i32 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn prefix(self) -> &'static str {
        match self {
            StreamKind::Stdout => "STDOUT",
            StreamKind::Stderr => "STDERR",
        }
    }
}

/// Called once per line of child-process output, as it arrives.
pub type ProgressCallback = Box<dyn FnMut(StreamKind, &str) + Send>;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub start_ts: DateTime<Utc>,
}

impl CommandResult {
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// The live resource behind a `Sandbox` descriptor: an owned workspace
/// directory and, while a command runs, its child process.
///
/// Exec is serial by default (`parallel_exec: false`): a second `exec` call
/// while one is in flight is rejected rather than queued, per spec.md §4.2 —
/// "`exec` may be called concurrently only when the sandbox's lifecycle
/// model explicitly allows it."
pub struct SandboxHandle {
    pub id: SandboxId,
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
    parallel_exec: bool,
    state: AsyncMutex<SandboxState>,
    log: AsyncMutex<Vec<String>>,
    exec_gate: AsyncMutex<()>,
    cancelled: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    active_children: AtomicU32,
}

impl SandboxHandle {
    pub(crate) fn new(
        id: SandboxId,
        workspace: PathBuf,
        env: HashMap<String, String>,
        parallel_exec: bool,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id,
            workspace,
            env,
            parallel_exec,
            state: AsyncMutex::new(SandboxState::Initializing),
            log: AsyncMutex::new(Vec::new()),
            exec_gate: AsyncMutex::new(()),
            cancelled: AtomicBool::new(false),
            cancel_tx,
            active_children: AtomicU32::new(0),
        }
    }

    pub async fn state(&self) -> SandboxState {
        *self.state.lock().await
    }

    pub(crate) async fn transition(&self, next: SandboxState) {
        let mut state = self.state.lock().await;
        debug_assert!(
            state.can_transition_to(next),
            "illegal sandbox transition {state:?} -> {next:?}"
        );
        *state = next;
    }

    pub async fn log_lines(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    async fn append_log(&self, kind: StreamKind, line: &str) {
        self.log
            .lock()
            .await
            .push(format!("{}: {}", kind.prefix(), line));
    }

    /// Marks the sandbox cancelled and signals any in-flight `exec` to kill
    /// its child immediately, rather than waiting out the command's timeout
    /// (spec.md §4.2: "any in-flight command is signaled to terminate").
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Number of child processes currently running inside this sandbox.
    pub fn active_children(&self) -> u32 {
        self.active_children.load(Ordering::SeqCst)
    }

    /// Spawn `command` inside the sandbox's workspace, streaming stdout and
    /// stderr line-by-line into the sandbox log and `progress_cb`.
    #[instrument(skip(self, progress_cb), fields(sandbox_id = %self.id))]
    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        mut progress_cb: Option<ProgressCallback>,
    ) -> Result<CommandResult, CommandError> {
        if self.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        if self.state().await.is_terminal() {
            return Err(CommandError::Destroyed);
        }

        let _permit = if self.parallel_exec {
            None
        } else {
            Some(
                self.exec_gate
                    .try_lock()
                    .map_err(|_| CommandError::ConcurrentExecDenied)?,
            )
        };

        self.transition(forgeloop_schemas::sandbox::SandboxState::Busy).await;
        let result = self.run_command(command, timeout, &mut progress_cb).await;
        if !self.state().await.is_terminal() {
            self.transition(forgeloop_schemas::sandbox::SandboxState::Ready).await;
        }
        result
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
        progress_cb: &mut Option<ProgressCallback>,
    ) -> Result<CommandResult, CommandError> {
        let start = Instant::now();
        let start_ts = Utc::now();

        let mut child = spawn(command, &self.workspace, &self.env)?;
        self.active_children.fetch_add(1, Ordering::SeqCst);

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut collected_stdout = String::new();
        let mut collected_stderr = String::new();
        let mut cancel_rx = self.cancel_tx.subscribe();

        let pump = async {
            if *cancel_rx.borrow() {
                let _ = child.start_kill();
                return Ok::<_, CommandError>(CANCELLED_EXIT_CODE);
            }
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_ok() && *cancel_rx.borrow() {
                            let _ = child.start_kill();
                            return Ok::<_, CommandError>(CANCELLED_EXIT_CODE);
                        }
                    }
                    line = stdout_lines.next_line() => match line {
                        Ok(Some(line)) => {
                            self.append_log(StreamKind::Stdout, &line).await;
                            if let Some(cb) = progress_cb.as_mut() {
                                cb(StreamKind::Stdout, &line);
                            }
                            collected_stdout.push_str(&line);
                            collected_stdout.push('\n');
                        }
                        Ok(None) => {}
                        Err(err) => warn!(%err, "error reading sandbox stdout"),
                    },
                    line = stderr_lines.next_line() => match line {
                        Ok(Some(line)) => {
                            self.append_log(StreamKind::Stderr, &line).await;
                            if let Some(cb) = progress_cb.as_mut() {
                                cb(StreamKind::Stderr, &line);
                            }
                            collected_stderr.push_str(&line);
                            collected_stderr.push('\n');
                        }
                        Ok(None) => {}
                        Err(err) => warn!(%err, "error reading sandbox stderr"),
                    },
                    status = child.wait() => {
                        let status = status.map_err(CommandError::Spawn)?;
                        return Ok::<_, CommandError>(status.code().unwrap_or(-1));
                    }
                }
            }
        };

        let outcome = tokio::time::timeout(timeout, pump).await;
        self.active_children.fetch_sub(1, Ordering::SeqCst);

        let exit_code = match outcome {
            Ok(Ok(CANCELLED_EXIT_CODE)) => {
                let _ = child.wait().await;
                collected_stderr.push_str("command cancelled and terminated\n");
                CANCELLED_EXIT_CODE
            }
            Ok(Ok(code)) => code,
            Ok(Err(err)) => return Err(err),
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                collected_stderr.push_str(&format!(
                    "command timed out after {:.1}s and was terminated\n",
                    timeout.as_secs_f64()
                ));
                TIMEOUT_EXIT_CODE
            }
        };

        Ok(CommandResult {
            command: command.to_string(),
            exit_code,
            stdout: collected_stdout,
            stderr: collected_stderr,
            duration: start.elapsed(),
            start_ts,
        })
    }
}

fn spawn(
    command: &str,
    workspace: &std::path::Path,
    env: &HashMap<String, String>,
) -> Result<Child, CommandError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workspace)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn().map_err(CommandError::Spawn)
}

/// Synchronous helper used by teardown paths (preparation sequence during
/// `create`), where we want to run to completion without streaming.
pub(crate) async fn run_to_completion(
    command: &str,
    workspace: &std::path::Path,
    env: &HashMap<String, String>,
) -> std::io::Result<(i32, String)> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workspace)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stderr = child.stderr.take().expect("piped stderr");
    let mut stderr_buf = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut stderr_buf).await?;

    let status = child.wait().await?;
    Ok((
        status.code().unwrap_or(-1),
        String::from_utf8_lossy(&stderr_buf).into_owned(),
    ))
}
