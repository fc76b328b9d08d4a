use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use cellar_lib::cache::{ArtifactCache, BuildRecord};
use cellar_lib::formula::{FormulaView, SourceRef};
use cellar_lib::platform::Platform;
use cellar_lib::platform::paths::CellarPaths;
use cellar_lib::resolve::{DependencyResolver, ResolveError, ResolvedPlan, build_key};
use cellar_lib::store_lock::{LockMode, StoreLock};

use crate::output::{OutputFormat, print_info, print_json, print_skipped, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct PlanEntry {
  name: String,
  version: String,
  /// Digest of the cached artifact matching the current descriptor.
  cached: Option<String>,
}

#[derive(Serialize)]
struct InfoOutput<'a> {
  platform: String,
  formula: &'a FormulaView,
  build_order: Vec<PlanEntry>,
}

pub fn cmd_info(formula_dir: &Path, name: &str, platform: Option<&str>, output: OutputFormat) -> Result<()> {
  let paths = CellarPaths::from_env();
  let _lock = StoreLock::acquire(&paths, LockMode::Shared, "info").context("Failed to acquire store lock")?;

  let registry = super::load_registry(formula_dir, &paths)?;
  let platform = super::target_platform(platform)?;
  let view = registry
    .view(name, &platform)
    .ok_or_else(|| ResolveError::UnknownFormula(name.to_string()))?;

  let plan = DependencyResolver::new(&registry, platform)
    .plan(&[name])
    .context("Failed to resolve dependencies")?;
  let cache = ArtifactCache::new(&paths);
  let build_order = cached_state(&plan, &platform, &cache)?;

  if output.is_json() {
    return print_json(&InfoOutput {
      platform: platform.to_string(),
      formula: &view,
      build_order,
    });
  }

  print_info(&format!("{} {} ({})", view.name, view.pkg_version(), platform));
  print_stat("Source", &describe_source(&view.source));
  for resource in &view.resources {
    print_stat("Resource", &format!("{} ({})", resource.name, truncate_hash(&resource.checksum.0)));
  }
  if let Some(reason) = &view.keg_only {
    print_stat("Keg-only", reason);
  }
  if let Some(bottle) = &view.bottle {
    print_stat("Bottle", &format!("{} ({})", bottle.tag, truncate_hash(&bottle.sha256.0)));
  }
  for dep in &view.dependencies {
    print_stat("Depends on", &format!("{} ({})", dep.name, dep.kind.as_str()));
  }
  print_stat("Install steps", &view.install.len().to_string());
  print_stat("Test steps", &view.tests.len().to_string());

  println!();
  println!("Build order:");
  for entry in &build_order {
    let label = format!("{} {}", entry.name, entry.version);
    match &entry.cached {
      Some(digest) => print_success(&format!("{label} (cached {})", truncate_hash(digest))),
      None => print_skipped(&format!("{label} (not built)")),
    }
  }

  Ok(())
}

/// Walk the plan in order, looking each node up under the key a build would
/// use. A node whose dependencies are not all cached cannot be cached either.
fn cached_state(plan: &ResolvedPlan, platform: &Platform, cache: &ArtifactCache) -> Result<Vec<PlanEntry>> {
  let mut records: Vec<Option<BuildRecord>> = Vec::with_capacity(plan.len());
  let mut entries = Vec::with_capacity(plan.len());

  for node in plan.nodes() {
    let upstream: Option<Vec<&BuildRecord>> = node.build_deps.iter().map(|&d| records[d].as_ref()).collect();
    let record = match upstream {
      Some(upstream) => {
        let key = build_key(&node.view, platform, &upstream).context("Failed to compute build key")?;
        cache.record(&key).context("Failed to read build record")?
      }
      None => None,
    };
    entries.push(PlanEntry {
      name: node.view.name.clone(),
      version: node.view.pkg_version(),
      cached: record.as_ref().map(|r| r.artifact_digest.0.clone()),
    });
    records.push(record);
  }

  Ok(entries)
}

fn describe_source(source: &SourceRef) -> String {
  match source {
    SourceRef::Url { url, mirrors, .. } if mirrors.is_empty() => url.clone(),
    SourceRef::Url { url, mirrors, .. } => format!("{url} (+{} mirrors)", mirrors.len()),
    SourceRef::Git { repository, tag, .. } => format!("{repository} @ {tag}"),
    SourceRef::Head { repository, branch } => match branch {
      Some(branch) => format!("{repository} (HEAD of {branch})"),
      None => format!("{repository} (HEAD)"),
    },
  }
}
