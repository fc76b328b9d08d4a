//! Plan execution.
//!
//! This module provides the [`BuildExecutor`], which walks a [`ResolvedPlan`]
//! and produces an artifact for every node. It handles:
//! - Event-driven scheduling: a node starts as soon as its last build/runtime
//!   dependency completes, bounded by `ExecuteConfig::jobs`
//! - Cache lookups and the single-flight build of missing artifacts
//! - The test phase, gated on test-only dependencies
//! - Failure propagation: transitive dependents of a failed node are skipped

pub mod build;
pub mod cmd;
pub mod context;
pub mod fetch;
pub mod fixup;
pub mod git;
pub mod types;
pub mod unpack;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{ArtifactCache, ArtifactOrigin, BuildRecord, CachedArtifact, RecordStatus};
use crate::formula::FormulaView;
use crate::platform::Platform;
use crate::platform::paths::CellarPaths;
use crate::resolve::{ResolvedPlan, build_key, rebuild_needed};
use crate::test_runner::TestRunner;

pub use build::{NodeJob, StoreDirs};
pub use types::*;

/// Executes resolved plans against one artifact cache.
pub struct BuildExecutor {
  shared: Arc<Shared>,
}

struct Shared {
  cache: Arc<ArtifactCache>,
  store: StoreDirs,
  config: ExecuteConfig,
  semaphore: Semaphore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
  Waiting,
  Building,
  AwaitingTests,
  Testing,
  Succeeded,
  Failed,
  Skipped,
}

enum TaskOutcome {
  Built(Result<(CachedArtifact, NodeStatus), ExecuteError>),
  Tested(Result<(), ExecuteError>),
}

impl BuildExecutor {
  pub fn new(paths: &CellarPaths, cache: Arc<ArtifactCache>, config: ExecuteConfig) -> Self {
    let store = StoreDirs {
      downloads: paths.downloads_dir(),
      logs: paths.logs_dir(),
      tmp: config.tmp_dir.clone().unwrap_or_else(|| paths.tmp_dir()),
    };
    let semaphore = Semaphore::new(config.jobs.max(1));
    Self {
      shared: Arc::new(Shared {
        cache,
        store,
        config,
        semaphore,
      }),
    }
  }

  pub fn cache(&self) -> &ArtifactCache {
    &self.shared.cache
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.shared.config
  }

  /// Execute every node of `plan`.
  ///
  /// Per-node errors never abort the run: the node is reported as failed
  /// and its transitive dependents as skipped, while unrelated nodes carry on.
  pub async fn execute(&self, plan: &ResolvedPlan) -> RunReport {
    info!(nodes = plan.len(), platform = %plan.platform(), jobs = self.shared.config.jobs, "starting execution");

    let mut run = Scheduler::new(plan);
    let mut join_set: JoinSet<(usize, TaskOutcome)> = JoinSet::new();

    loop {
      for idx in run.ready(NodeState::Waiting) {
        run.states[idx] = NodeState::Building;
        run.started[idx] = Some(Instant::now());
        let node = &plan.nodes()[idx];
        let upstream: Vec<BuildRecord> = node
          .build_deps
          .iter()
          .filter_map(|&d| run.artifacts[d].as_ref().map(|a| a.record.clone()))
          .collect();
        let deps = run.dep_paths(&node.build_deps);
        let job = spawn_guarded(build_task(
          self.shared.clone(),
          node.view.clone(),
          *plan.platform(),
          upstream,
          deps,
        ));
        join_set.spawn(async move { (idx, TaskOutcome::Built(job.await)) });
      }

      for idx in run.ready(NodeState::AwaitingTests) {
        run.states[idx] = NodeState::Testing;
        let node = &plan.nodes()[idx];
        let all_deps: Vec<usize> = node.build_deps.iter().chain(&node.test_deps).copied().collect();
        let deps = run.dep_paths(&all_deps);
        let Some(artifact) = run.artifacts[idx].clone() else {
          continue;
        };
        let job = spawn_guarded(test_task(self.shared.clone(), node.view.clone(), artifact, deps));
        join_set.spawn(async move { (idx, TaskOutcome::Tested(job.await)) });
      }

      let Some(joined) = join_set.join_next().await else {
        break;
      };
      let (idx, outcome) = match joined {
        Ok(v) => v,
        Err(e) => {
          error!(error = %e, "execution task failed to complete");
          continue;
        }
      };

      match outcome {
        TaskOutcome::Built(Ok((artifact, status))) => {
          let report = &mut run.reports[idx];
          report.status = status;
          report.record = Some(artifact.record.clone());
          report.artifact = Some(artifact.path.clone());
          run.artifacts[idx] = Some(artifact);

          let view = &plan.nodes()[idx].view;
          if self.shared.config.run_tests && !view.tests.is_empty() {
            run.states[idx] = NodeState::AwaitingTests;
          } else {
            run.succeed(idx);
          }
        }
        TaskOutcome::Built(Err(e)) => run.fail(idx, Phase::Build, e),
        TaskOutcome::Tested(Ok(())) => {
          let report = &mut run.reports[idx];
          report.tests = TestOutcome::Passed;
          if let Some(record) = report.record.as_mut() {
            record.status = RecordStatus::Built;
          }
          run.succeed(idx);
        }
        TaskOutcome::Tested(Err(e)) => {
          let report = &mut run.reports[idx];
          report.tests = TestOutcome::Failed;
          if let Some(record) = report.record.as_mut() {
            record.status = RecordStatus::TestFailed;
          }
          run.fail(idx, Phase::Test, e);
        }
      }
    }

    let report = run.finish();
    info!(
      succeeded = report.nodes.iter().filter(|n| n.status.is_success()).count(),
      failed = report.with_status(NodeStatus::Failed).count(),
      skipped = report.with_status(NodeStatus::Skipped).count(),
      "execution complete"
    );
    report
  }

  /// Produce the artifact for `job`, from the cache when possible.
  pub async fn produce(&self, job: NodeJob) -> Result<(CachedArtifact, NodeStatus), ExecuteError> {
    produce(&self.shared, job).await
  }
}

/// Run `future` as its own task so a panic inside it becomes an error.
fn spawn_guarded<T, F>(future: F) -> impl Future<Output = Result<T, ExecuteError>>
where
  T: Send + 'static,
  F: Future<Output = Result<T, ExecuteError>> + Send + 'static,
{
  let handle = tokio::spawn(future);
  async move {
    match handle.await {
      Ok(result) => result,
      Err(e) => Err(ExecuteError::TaskPanicked(e.to_string())),
    }
  }
}

async fn build_task(
  shared: Arc<Shared>,
  view: FormulaView,
  platform: Platform,
  upstream: Vec<BuildRecord>,
  deps: BTreeMap<String, PathBuf>,
) -> Result<(CachedArtifact, NodeStatus), ExecuteError> {
  let _permit = shared
    .semaphore
    .acquire()
    .await
    .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))?;

  let upstream: Vec<&BuildRecord> = upstream.iter().collect();
  if !rebuild_needed(&view, &platform, &upstream, &shared.cache)? {
    let key = build_key(&view, &platform, &upstream).map_err(|e| ExecuteError::Cache(e.to_string()))?;
    if let Some(hit) = shared.cache.retrieve_async(&key).await? {
      info!(formula = %view.name, "using cached artifact");
      return Ok((hit, NodeStatus::Cached));
    }
  }

  let key = build_key(&view, &platform, &upstream).map_err(|e| ExecuteError::Cache(e.to_string()))?;
  produce(&shared, NodeJob { view, key, deps }).await
}

async fn produce(shared: &Shared, job: NodeJob) -> Result<(CachedArtifact, NodeStatus), ExecuteError> {
  let (artifact, ran) = shared
    .cache
    .get_or_build(&job.key, || {
      build::build_node(&job, &shared.cache, &shared.config, &shared.store)
    })
    .await?;

  let status = match (ran, artifact.record.origin) {
    (false, _) => NodeStatus::Cached,
    (true, ArtifactOrigin::Bottle) => NodeStatus::Poured,
    (true, ArtifactOrigin::Source) => NodeStatus::Built,
  };
  debug!(formula = %job.view.name, status = ?status, "artifact ready");
  Ok((artifact, status))
}

async fn test_task(
  shared: Arc<Shared>,
  view: FormulaView,
  artifact: CachedArtifact,
  deps: BTreeMap<String, PathBuf>,
) -> Result<(), ExecuteError> {
  let _permit = shared
    .semaphore
    .acquire()
    .await
    .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))?;

  let runner = TestRunner::new(&shared.config, shared.store.tmp.clone());
  let result = runner.run(&view, &artifact.path, &deps).await;

  let status = if result.is_ok() {
    RecordStatus::Built
  } else {
    RecordStatus::TestFailed
  };
  if artifact.record.status != status
    && let Err(e) = shared.cache.set_status(&artifact.record.key, status)
  {
    warn!(formula = %view.name, error = %e, "failed to update record status");
  }

  result.map(|_| ())
}

/// Bookkeeping for one `execute` call.
struct Scheduler<'p> {
  plan: &'p ResolvedPlan,
  states: Vec<NodeState>,
  reports: Vec<NodeReport>,
  artifacts: Vec<Option<CachedArtifact>>,
  started: Vec<Option<Instant>>,
  completion_order: Vec<String>,
}

impl<'p> Scheduler<'p> {
  fn new(plan: &'p ResolvedPlan) -> Self {
    let n = plan.len();
    Self {
      plan,
      states: vec![NodeState::Waiting; n],
      reports: plan.nodes().iter().map(|n| NodeReport::pending(n.name())).collect(),
      artifacts: vec![None; n],
      started: vec![None; n],
      completion_order: Vec::new(),
    }
  }

  /// Nodes in `state` whose gating dependencies have all succeeded, in plan
  /// order. Build edges gate the build, test edges gate the tests.
  fn ready(&self, state: NodeState) -> Vec<usize> {
    self
      .plan
      .nodes()
      .iter()
      .enumerate()
      .filter(|(i, _)| self.states[*i] == state)
      .filter(|(_, node)| {
        let gates = if state == NodeState::Waiting {
          &node.build_deps
        } else {
          &node.test_deps
        };
        gates.iter().all(|&d| self.states[d] == NodeState::Succeeded)
      })
      .map(|(i, _)| i)
      .collect()
  }

  fn dep_paths(&self, deps: &[usize]) -> BTreeMap<String, PathBuf> {
    deps
      .iter()
      .filter_map(|&d| {
        self.artifacts[d]
          .as_ref()
          .map(|a| (self.plan.nodes()[d].name().to_string(), a.path.clone()))
      })
      .collect()
  }

  fn finish_node(&mut self, idx: usize) {
    if let Some(started) = self.started[idx] {
      self.reports[idx].duration = started.elapsed();
    }
    self.completion_order.push(self.plan.nodes()[idx].name().to_string());
  }

  fn succeed(&mut self, idx: usize) {
    self.states[idx] = NodeState::Succeeded;
    self.finish_node(idx);
    info!(formula = %self.plan.nodes()[idx].name(), status = ?self.reports[idx].status, "node complete");
  }

  fn fail(&mut self, idx: usize, phase: Phase, err: ExecuteError) {
    let name = self.plan.nodes()[idx].name().to_string();
    error!(formula = %name, phase = ?phase, error = %err, "node failed");
    self.states[idx] = NodeState::Failed;
    self.reports[idx].status = NodeStatus::Failed;
    self.reports[idx].error = Some((phase, err));
    self.finish_node(idx);

    let mut stack = self.plan.dependents(idx);
    while let Some(dep) = stack.pop() {
      if !matches!(self.states[dep], NodeState::Waiting | NodeState::AwaitingTests) {
        continue;
      }
      warn!(formula = %self.plan.nodes()[dep].name(), failed_dep = %name, "skipping due to failed dependency");
      self.states[dep] = NodeState::Skipped;
      let report = &mut self.reports[dep];
      report.status = NodeStatus::Skipped;
      report.failed_dependency = Some(name.clone());
      stack.extend(self.plan.dependents(dep));
    }
  }

  fn finish(self) -> RunReport {
    RunReport {
      nodes: self.reports,
      completion_order: self.completion_order,
    }
  }
}
