//! Types for build execution.
//!
//! Error, report and configuration types shared by the executor, the cache
//! and the test runner.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::cache::{ArtifactOrigin, BuildRecord};
use crate::consts::DEFAULT_SYSTEM_PATH;
use crate::placeholder::PlaceholderError;

/// Errors that abort a single plan node.
///
/// Cloneable so one failed single-flight build can be handed to every
/// waiter on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecuteError {
  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("fetch failed for {url}: {message}")]
  Fetch { url: String, message: String },

  /// Downloaded source, bottle or git revision differs from the declaration.
  #[error("checksum mismatch for {origin}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    origin: String,
    expected: String,
    actual: String,
  },

  #[error("git error for {repository}: {message}")]
  Git { repository: String, message: String },

  #[error("failed to unpack {path}: {message}")]
  Unpack { path: String, message: String },

  /// An install step exited non-zero.
  #[error("install step {index} ({command}) failed with exit code {}", code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
  BuildStepError {
    index: usize,
    command: String,
    code: Option<i32>,
    output: String,
  },

  #[error("step {index} ({command}) timed out after {timeout:?}")]
  StepTimeout {
    index: usize,
    command: String,
    timeout: Duration,
  },

  #[error("fixup {index} failed: {message}")]
  Fixup { index: usize, message: String },

  #[error("cache corruption for {key}: recorded digest {expected}, tree digest {actual}")]
  CacheCorruption {
    key: String,
    expected: String,
    actual: String,
  },

  #[error("cache error: {0}")]
  Cache(String),

  /// A test step's assertion did not hold.
  #[error("test step {index} failed: expected {expected}, got {actual}")]
  TestAssertionFailure {
    index: usize,
    expected: String,
    actual: String,
  },

  #[error("io error: {message}")]
  Io { message: String },

  #[error("task panicked: {0}")]
  TaskPanicked(String),
}

impl From<std::io::Error> for ExecuteError {
  fn from(e: std::io::Error) -> Self {
    Self::Io { message: e.to_string() }
  }
}

/// Final state of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  /// Built from source during this run.
  Built,
  /// Reused from the artifact cache.
  Cached,
  /// Installed from a bottle.
  Poured,
  Failed,
  /// Not attempted because a dependency failed.
  Skipped,
}

impl NodeStatus {
  pub fn is_success(&self) -> bool {
    matches!(self, Self::Built | Self::Cached | Self::Poured)
  }
}

/// Which phase a node failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Build,
  Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
  NotRun,
  Passed,
  Failed,
}

/// Outcome of one plan node.
#[derive(Debug, Clone)]
pub struct NodeReport {
  pub name: String,
  pub status: NodeStatus,
  pub tests: TestOutcome,
  pub record: Option<BuildRecord>,
  pub artifact: Option<PathBuf>,
  pub error: Option<(Phase, ExecuteError)>,
  /// For skipped nodes, the dependency whose failure caused the skip.
  pub failed_dependency: Option<String>,
  pub duration: Duration,
}

impl NodeReport {
  /// Whether the artifact came from a source build, which implies the
  /// declared source was fetched and verified at some point.
  pub fn source_verified(&self) -> bool {
    self
      .record
      .as_ref()
      .is_some_and(|record| record.origin == ArtifactOrigin::Source)
  }

  pub(crate) fn pending(name: &str) -> Self {
    Self {
      name: name.to_string(),
      status: NodeStatus::Skipped,
      tests: TestOutcome::NotRun,
      record: None,
      artifact: None,
      error: None,
      failed_dependency: None,
      duration: Duration::ZERO,
    }
  }
}

/// Result of executing a plan.
#[derive(Debug, Default)]
pub struct RunReport {
  /// One entry per plan node, in plan order.
  pub nodes: Vec<NodeReport>,
  /// Node names in the order they finished.
  pub completion_order: Vec<String>,
}

impl RunReport {
  pub fn get(&self, name: &str) -> Option<&NodeReport> {
    self.nodes.iter().find(|n| n.name == name)
  }

  pub fn is_success(&self) -> bool {
    self.nodes.iter().all(|n| n.status.is_success())
  }

  pub fn with_status(&self, status: NodeStatus) -> impl Iterator<Item = &NodeReport> {
    self.nodes.iter().filter(move |n| n.status == status)
  }

  /// 0 on success, 1 when any node failed to build, 3 when only tests failed.
  pub fn exit_code(&self) -> i32 {
    let failures: Vec<Phase> = self
      .nodes
      .iter()
      .filter_map(|n| n.error.as_ref().map(|(phase, _)| *phase))
      .collect();
    if failures.contains(&Phase::Build) {
      1
    } else if failures.contains(&Phase::Test) {
      3
    } else if self.is_success() {
      0
    } else {
      1
    }
  }
}

/// Configuration for build execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes building or testing at once.
  pub jobs: usize,
  /// Upper bound for every install and test step.
  pub step_timeout: Duration,
  pub run_tests: bool,
  /// Ignore bottles even when one matches the platform.
  pub build_from_source: bool,
  /// Base URL (http(s) or file://) bottles are fetched from.
  pub bottle_mirror: Option<String>,
  /// Appended to the dependency `bin` directories on PATH.
  pub system_path: String,
  /// Parent of per-node working directories; `<root>/tmp` when unset.
  pub tmp_dir: Option<PathBuf>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      jobs: num_cpus(),
      step_timeout: Duration::from_secs(30 * 60),
      run_tests: true,
      build_from_source: false,
      bottle_mirror: None,
      system_path: DEFAULT_SYSTEM_PATH.to_string(),
      tmp_dir: None,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
