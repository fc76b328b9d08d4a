use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use cellar_lib::cache::ArtifactCache;
use cellar_lib::execute::{BuildExecutor, ExecuteConfig, ExecuteError, NodeReport, NodeStatus, Phase, RunReport, TestOutcome};
use cellar_lib::platform::paths::CellarPaths;
use cellar_lib::resolve::DependencyResolver;
use cellar_lib::store_lock::{LockMode, StoreLock};

use crate::output::{
  OutputFormat, format_duration, print_detail, print_failure, print_info, print_json, print_skipped, print_stat,
  print_success, symbols, tail, truncate_hash,
};

/// Lines of build output shown under a failed install step.
const OUTPUT_TAIL_LINES: usize = 20;

/// Options of `cellar build` beyond the formula list.
pub struct BuildArgs {
  pub platform: Option<String>,
  pub jobs: Option<usize>,
  pub step_timeout: Option<Duration>,
  pub no_test: bool,
  pub build_from_source: bool,
  pub bottle_mirror: Option<String>,
}

#[derive(Serialize)]
struct NodeOutput<'a> {
  name: &'a str,
  version: Option<String>,
  status: NodeStatus,
  tests: TestOutcome,
  #[serde(skip_serializing_if = "Option::is_none")]
  artifact: Option<&'a Path>,
  #[serde(skip_serializing_if = "Option::is_none")]
  artifact_digest: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  log: Option<&'a Path>,
  #[serde(skip_serializing_if = "Option::is_none")]
  phase: Option<Phase>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  failed_dependency: Option<&'a str>,
  duration_ms: u128,
}

#[derive(Serialize)]
struct BuildOutput<'a> {
  platform: String,
  success: bool,
  exit_code: i32,
  nodes: Vec<NodeOutput<'a>>,
  completion_order: &'a [String],
}

pub fn cmd_build(formula_dir: &Path, formulas: &[String], args: BuildArgs, output: OutputFormat) -> Result<u8> {
  let start = Instant::now();
  let paths = CellarPaths::from_env();

  let command = format!("build {}", formulas.join(" "));
  let _lock = StoreLock::acquire(&paths, LockMode::Exclusive, &command).context("Failed to acquire store lock")?;

  let mut registry = super::load_registry(formula_dir, &paths)?;
  let platform = super::target_platform(args.platform.as_deref())?;

  let targets: Vec<&str> = formulas.iter().map(String::as_str).collect();
  let plan = DependencyResolver::new(&registry, platform)
    .with_test_dependencies(!args.no_test)
    .plan(&targets)
    .context("Failed to resolve dependencies")?;

  if !output.is_json() {
    print_info(&format!(
      "Building {} formula(s) for {}: {}",
      plan.len(),
      platform,
      plan.order().join(&format!(" {} ", symbols::ARROW))
    ));
  }

  let mut config = ExecuteConfig {
    run_tests: !args.no_test,
    build_from_source: args.build_from_source,
    bottle_mirror: args.bottle_mirror,
    ..ExecuteConfig::default()
  };
  if let Some(jobs) = args.jobs {
    config.jobs = jobs.max(1);
  }
  if let Some(timeout) = args.step_timeout {
    config.step_timeout = timeout;
  }

  let cache = Arc::new(ArtifactCache::new(&paths));
  let executor = BuildExecutor::new(&paths, cache, config);
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(executor.execute(&plan));

  for node in report.nodes.iter().filter(|n| n.source_verified()) {
    registry.record_verified(&node.name);
  }
  registry.save_ledger().context("Failed to save checksum ledger")?;

  let exit_code = report.exit_code();
  info!(exit_code, elapsed = ?start.elapsed(), "build finished");

  if output.is_json() {
    let nodes = report
      .nodes
      .iter()
      .map(|node| {
        let version = plan.get(&node.name).map(|n| n.view.pkg_version());
        node_output(node, version)
      })
      .collect();
    print_json(&BuildOutput {
      platform: platform.to_string(),
      success: report.is_success(),
      exit_code,
      nodes,
      completion_order: &report.completion_order,
    })?;
  } else {
    println!();
    for node in &report.nodes {
      let version = plan.get(&node.name).map(|n| n.view.pkg_version()).unwrap_or_default();
      print_node(node, &version);
    }
    print_summary(&report, start.elapsed());
  }

  Ok(u8::try_from(exit_code).unwrap_or(1))
}

fn node_output(node: &NodeReport, version: Option<String>) -> NodeOutput<'_> {
  NodeOutput {
    name: &node.name,
    version,
    status: node.status,
    tests: node.tests,
    artifact: node.artifact.as_deref(),
    artifact_digest: node.record.as_ref().map(|r| r.artifact_digest.0.as_str()),
    log: node.record.as_ref().and_then(|r| r.log_path.as_deref()),
    phase: node.error.as_ref().map(|(phase, _)| *phase),
    error: node.error.as_ref().map(|(_, e)| e.to_string()),
    failed_dependency: node.failed_dependency.as_deref(),
    duration_ms: node.duration.as_millis(),
  }
}

fn print_node(node: &NodeReport, version: &str) {
  let label = format!("{} {}", node.name, version);
  match node.status {
    NodeStatus::Built | NodeStatus::Cached | NodeStatus::Poured => {
      let how = match node.status {
        NodeStatus::Built => "built",
        NodeStatus::Cached => "cached",
        _ => "poured",
      };
      let tests = match node.tests {
        TestOutcome::Passed => ", tests passed",
        _ => "",
      };
      print_success(&format!("{label} ({how}{tests}, {})", format_duration(node.duration)));
      if let Some(record) = &node.record {
        print_stat("digest", truncate_hash(&record.artifact_digest.0));
      }
    }
    NodeStatus::Failed => {
      let phase = match node.error.as_ref().map(|(p, _)| *p) {
        Some(Phase::Test) => "tests failed",
        _ => "build failed",
      };
      print_failure(&format!("{label} ({phase})"));
      if let Some((_, err)) = &node.error {
        print_detail(&err.to_string());
        if let ExecuteError::BuildStepError { output, .. } = err
          && !output.trim().is_empty()
        {
          print_detail(&tail(output, OUTPUT_TAIL_LINES));
        }
      }
      if let Some(log) = node.record.as_ref().and_then(|r| r.log_path.as_ref()) {
        print_stat("log", &log.display().to_string());
      }
    }
    NodeStatus::Skipped => {
      let reason = node
        .failed_dependency
        .as_deref()
        .map(|dep| format!("dependency {dep} failed"))
        .unwrap_or_else(|| "not attempted".to_string());
      print_skipped(&format!("{label} (skipped: {reason})"));
    }
  }
}

fn print_summary(report: &RunReport, elapsed: Duration) {
  println!();
  let count = |status| report.with_status(status).count();
  if report.is_success() {
    print_success("Build complete!");
  } else {
    print_failure("Build finished with failures");
  }
  print_stat("Built", &count(NodeStatus::Built).to_string());
  print_stat("Poured", &count(NodeStatus::Poured).to_string());
  print_stat("Cached", &count(NodeStatus::Cached).to_string());
  print_stat("Failed", &count(NodeStatus::Failed).to_string());
  print_stat("Skipped", &count(NodeStatus::Skipped).to_string());
  print_stat("Duration", &format_duration(elapsed));
}

