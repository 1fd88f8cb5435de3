//! Shell execution engine.
//!
//! One invocation moves `Spawned -> Running -> {Completed | TimedOut | Killed}`.
//! The command runs as the leader of its own process group; on timeout or
//! cancellation the whole group gets a graceful signal, then a forceful one
//! if it is still alive after the grace window.

pub mod denylist;
pub mod process_group;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use atelier_cancel::CancelToken;
use atelier_config::ShellConfig;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use denylist::CommandDenylist;
pub use process_group::ProcessGroup;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

#[derive(Debug, Error)]
pub enum ExecError {
  #[error("command denied: {reason}")]
  Denied { reason: String },
  #[error("invalid deny-list pattern: {0}")]
  InvalidDenylist(String),
  #[error("failed to spawn shell: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("failed to wait for command: {0}")]
  Wait(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
  Spawned,
  Running,
  Completed,
  TimedOut,
  Killed,
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
  pub command: String,
  pub cwd: PathBuf,
  pub timeout: Duration,
  pub capture_output: bool,
  pub env: HashMap<String, String>,
}

/// Outcome of one command. A timeout is reported here, not as an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
  pub exit_code: Option<i32>,
  pub signal: Option<i32>,
  pub stdout: String,
  pub stderr: String,
  pub duration_ms: u64,
  pub timed_out: bool,
  #[serde(skip)]
  pub state: ExecState,
}

impl ProcessResult {
  pub fn success(&self) -> bool {
    self.state == ExecState::Completed && self.exit_code == Some(0)
  }
}

pub struct ExecEngine {
  shell: PathBuf,
  grace_period: Duration,
  max_output_bytes: usize,
  uncaptured_stdout_to_stderr: bool,
  denylist: CommandDenylist,
}

impl ExecEngine {
  pub fn from_config(config: &ShellConfig) -> Result<Self, ExecError> {
    let shell = config.binary.clone().unwrap_or_else(default_shell);
    Ok(Self {
      shell,
      grace_period: Duration::from_millis(config.grace_period_ms),
      max_output_bytes: config.max_output_bytes,
      uncaptured_stdout_to_stderr: config.uncaptured_stdout_to_stderr,
      denylist: CommandDenylist::with_extra(&config.extra_deny_patterns)?,
    })
  }

  /// Deny-list check alone; nothing is spawned.
  pub fn check(&self, command: &str) -> Result<(), ExecError> {
    match self.denylist.check(command) {
      Some(reason) => {
        warn!(command, reason, "shell command denied");
        Err(ExecError::Denied {
          reason: reason.to_string(),
        })
      }
      None => Ok(()),
    }
  }

  pub async fn run(
    &self,
    request: ExecRequest,
    cancel: &CancelToken,
  ) -> Result<ProcessResult, ExecError> {
    self.check(&request.command)?;

    let started = Instant::now();
    let mut child = self.spawn(&request).map_err(ExecError::Spawn)?;
    let pid = child.id().unwrap_or_default();
    let group = process_group::for_leader(pid);
    let mut guard = GroupGuard::new(group);
    debug!(pid, state = ?ExecState::Spawned, command = %request.command, "shell spawned");

    let stdout = child.stdout.take().map(|out| Capture::start(out, self.max_output_bytes));
    let stderr = child.stderr.take().map(|err| Capture::start(err, self.max_output_bytes));
    debug!(pid, state = ?ExecState::Running, "shell running");

    enum Waited {
      Exited(std::io::Result<ExitStatus>),
      TimedOut,
      Cancelled,
    }

    let waited = tokio::select! {
      biased;
      _ = cancel.cancelled() => Waited::Cancelled,
      status = child.wait() => Waited::Exited(status),
      _ = tokio::time::sleep(request.timeout) => Waited::TimedOut,
    };

    let (status, state) = match waited {
      Waited::Exited(status) => (status.map_err(ExecError::Wait)?, ExecState::Completed),
      Waited::TimedOut => {
        info!(pid, timeout_ms = request.timeout.as_millis() as u64, "shell timed out");
        (self.escalate(&mut child, guard.group()).await?, ExecState::TimedOut)
      }
      Waited::Cancelled => {
        info!(pid, "shell cancelled");
        (self.escalate(&mut child, guard.group()).await?, ExecState::Killed)
      }
    };
    guard.disarm();

    // An escaped grandchild can hold the pipes open; bound the drain.
    let stdout = match stdout {
      Some(capture) => capture.finish(self.grace_period).await,
      None => String::new(),
    };
    let stderr = match stderr {
      Some(capture) => capture.finish(self.grace_period).await,
      None => String::new(),
    };

    let result = ProcessResult {
      exit_code: status.code(),
      signal: exit_signal(&status),
      stdout,
      stderr,
      duration_ms: started.elapsed().as_millis() as u64,
      timed_out: state == ExecState::TimedOut,
      state,
    };
    debug!(
      pid,
      state = ?result.state,
      exit_code = ?result.exit_code,
      signal = ?result.signal,
      duration_ms = result.duration_ms,
      "shell finished"
    );
    Ok(result)
  }

  fn spawn(&self, request: &ExecRequest) -> std::io::Result<Child> {
    let mut cmd = Command::new(&self.shell);
    cmd
      .arg("-c")
      .arg(&request.command)
      .current_dir(&request.cwd)
      .envs(&request.env)
      .stdin(Stdio::null())
      .kill_on_drop(true);

    if request.capture_output {
      cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
      let stdout = if self.uncaptured_stdout_to_stderr {
        Stdio::from(std::io::stderr())
      } else {
        Stdio::inherit()
      };
      cmd.stdout(stdout).stderr(Stdio::inherit());
    }

    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
      const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
      cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn()
  }

  /// Graceful signal, grace window, forceful signal, reap.
  async fn escalate(
    &self,
    child: &mut Child,
    group: &dyn ProcessGroup,
  ) -> Result<ExitStatus, ExecError> {
    if let Err(err) = group.terminate() {
      warn!(error = %err, "failed to send graceful termination");
    }

    match tokio::time::timeout(self.grace_period, child.wait()).await {
      Ok(status) => status.map_err(ExecError::Wait),
      Err(_) => {
        info!(grace_ms = self.grace_period.as_millis() as u64, "escalating to forceful kill");
        if let Err(err) = group.kill() {
          warn!(error = %err, "failed to kill process group");
          let _ = child.start_kill();
        }
        child.wait().await.map_err(ExecError::Wait)
      }
    }
  }
}

fn default_shell() -> PathBuf {
  #[cfg(unix)]
  {
    which::which("bash").unwrap_or_else(|_| PathBuf::from("/bin/sh"))
  }
  #[cfg(not(unix))]
  {
    which::which("bash").unwrap_or_else(|_| PathBuf::from("sh"))
  }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
  use std::os::unix::process::ExitStatusExt;
  status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
  None
}

/// Kills the group if the owning future is dropped mid-run.
struct GroupGuard {
  group: Option<Box<dyn ProcessGroup>>,
}

impl GroupGuard {
  fn new(group: Box<dyn ProcessGroup>) -> Self {
    Self { group: Some(group) }
  }

  fn group(&self) -> &dyn ProcessGroup {
    match &self.group {
      Some(group) => group.as_ref(),
      None => &NoGroup,
    }
  }

  fn disarm(&mut self) {
    self.group = None;
  }
}

impl Drop for GroupGuard {
  fn drop(&mut self) {
    if let Some(group) = self.group.take() {
      let _ = group.kill();
    }
  }
}

struct NoGroup;

impl ProcessGroup for NoGroup {
  fn terminate(&self) -> std::io::Result<()> {
    Ok(())
  }

  fn kill(&self) -> std::io::Result<()> {
    Ok(())
  }
}

#[derive(Default)]
struct CaptureBuf {
  bytes: Vec<u8>,
  truncated: bool,
}

/// Incremental reader for one output stream, capped at `limit` bytes. The
/// stream is drained past the cap so the child never blocks on a full pipe.
struct Capture {
  buf: Arc<Mutex<CaptureBuf>>,
  task: JoinHandle<()>,
}

impl Capture {
  fn start<R>(mut reader: R, limit: usize) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let buf = Arc::new(Mutex::new(CaptureBuf::default()));
    let sink = buf.clone();
    let task = tokio::spawn(async move {
      let mut chunk = [0u8; 8192];
      loop {
        match reader.read(&mut chunk).await {
          Ok(0) | Err(_) => break,
          Ok(n) => {
            let Ok(mut out) = sink.lock() else {
              break;
            };
            let room = limit.saturating_sub(out.bytes.len());
            if room < n {
              out.truncated = true;
            }
            let take = room.min(n);
            out.bytes.extend_from_slice(&chunk[..take]);
          }
        }
      }
    });
    Self { buf, task }
  }

  async fn finish(self, bound: Duration) -> String {
    let Self { buf, task } = self;
    let abort = task.abort_handle();
    if tokio::time::timeout(bound, task).await.is_err() {
      abort.abort();
      debug!("output reader still open after exit; keeping partial output");
    }
    let Ok(out) = buf.lock() else {
      return String::new();
    };
    let mut text = String::from_utf8_lossy(&out.bytes).into_owned();
    if out.truncated {
      text.push_str(TRUNCATION_MARKER);
    }
    text
  }
}
