//! Running one rendered step as an external process.
//!
//! The process starts from an empty environment: only the variables the
//! [`StepContext`] provides are visible. Every run is time-boxed. On unix the
//! step leads its own process group, and the whole group is killed once the
//! step returns or times out, so no compiler or forked shell outlives it.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::context::{Invocation, StepContext};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
  /// `None` when the process was terminated by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl StepOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// stdout followed by stderr, for error reports and logs.
  pub fn combined(&self) -> String {
    match (self.stdout.is_empty(), self.stderr.is_empty()) {
      (_, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
    }
  }
}

#[derive(Debug, Error)]
pub enum RunError {
  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
}

/// Run `invocation` in the context's working directory.
///
/// Program names without a `/` are looked up on the context's PATH, not on
/// the caller's.
pub async fn run(ctx: &StepContext, invocation: &Invocation) -> Result<StepOutput, RunError> {
  info!(cmd = %invocation.display(), "running step");

  let mut command = Command::new(&invocation.program);
  command
    .args(&invocation.args)
    .current_dir(ctx.cwd())
    .env_clear()
    .envs(&invocation.env)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  command.process_group(0);

  debug!(program = %invocation.program, cwd = %ctx.cwd().display(), "spawning process");

  let child = command.spawn().map_err(|source| RunError::Spawn {
    program: invocation.program.clone(),
    source,
  })?;
  let pid = child.id();

  let waited = tokio::time::timeout(ctx.timeout(), child.wait_with_output()).await;
  kill_process_group(pid);
  let output = match waited {
    Ok(result) => result.map_err(|source| RunError::Spawn {
      program: invocation.program.clone(),
      source,
    })?,
    Err(_) => {
      warn!(cmd = %invocation.display(), timeout = ?ctx.timeout(), "step timed out");
      return Err(RunError::Timeout(ctx.timeout()));
    }
  };

  let result = StepOutput {
    code: output.status.code(),
    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
  };

  if !result.success() {
    if !result.stderr.is_empty() {
      debug!(stderr = %result.stderr, "command stderr");
    }
    if !result.stdout.is_empty() {
      debug!(stdout = %result.stdout, "command stdout");
    }
  }

  Ok(result)
}

/// Kill whatever is left of the group led by `pid`. A group that is
/// already gone is not an error.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
  use rustix::io::Errno;
  use rustix::process::{Pid, Signal};

  let Some(group) = pid.and_then(|p| i32::try_from(p).ok()).and_then(Pid::from_raw) else {
    return;
  };
  match rustix::process::kill_process_group(group, Signal::KILL) {
    Ok(()) => debug!(pgid = ?pid, "killed leftover processes"),
    Err(e) if e == Errno::SRCH => {}
    Err(e) => warn!(pgid = ?pid, error = %e, "failed to kill process group"),
  }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
