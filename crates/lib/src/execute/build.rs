//! Producing the artifact of one plan node: pour a bottle or build from
//! source, then hand the prefix to the cache.
//!
//! A source build fetches the main source and every resource, verifies all
//! of them, and stages each resource under `<buildpath>/resources/<name>`
//! before the first install step runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::cache::{ArtifactCache, ArtifactOrigin, BuildKey, CachedArtifact};
use crate::formula::{FormulaView, SourceRef, ViewBottle, ViewResource};
use crate::util::hash::Hashable;

use super::cmd::{self, RunError};
use super::context::{BuildDirs, StepContext};
use super::fetch::fetch_verified;
use super::fixup::apply_fixups;
use super::git;
use super::types::{ExecuteConfig, ExecuteError};
use super::unpack::{enter_single_dir, unpack_into, unpack_source};

/// Store locations a build reads from and writes to.
#[derive(Debug, Clone)]
pub struct StoreDirs {
  pub downloads: PathBuf,
  pub logs: PathBuf,
  pub tmp: PathBuf,
}

/// Everything needed to produce one node's artifact.
#[derive(Debug, Clone)]
pub struct NodeJob {
  pub view: FormulaView,
  pub key: BuildKey,
  /// Artifact paths of the build and runtime dependencies.
  pub deps: BTreeMap<String, PathBuf>,
}

/// `<name>--<pkg_version>.<tag>.bottle.tar.gz`
pub fn bottle_file_name(view: &FormulaView, tag: &str) -> String {
  format!("{}--{}.{}.bottle.tar.gz", view.name, view.pkg_version(), tag)
}

/// Produce and store the artifact for `job`.
///
/// A matching bottle is poured when a mirror is configured; a bottle that
/// cannot be downloaded falls back to a source build. The working directory
/// is removed on every exit path.
pub async fn build_node(
  job: &NodeJob,
  cache: &ArtifactCache,
  config: &ExecuteConfig,
  store: &StoreDirs,
) -> Result<CachedArtifact, ExecuteError> {
  let view = &job.view;
  tokio::fs::create_dir_all(&store.tmp).await?;
  let work = tempfile::Builder::new()
    .prefix(&format!("{}-", view.name))
    .tempdir_in(&store.tmp)?;

  if !config.build_from_source
    && let (Some(bottle), Some(mirror)) = (&view.bottle, &config.bottle_mirror)
  {
    match pour(job, bottle, mirror, work.path(), cache, store).await {
      Ok(artifact) => return Ok(artifact),
      Err(ExecuteError::Fetch { url, message }) => {
        warn!(formula = %view.name, url = %url, error = %message, "bottle unavailable, building from source");
      }
      Err(e) => return Err(e),
    }
  }

  build_from_source(job, work.path(), cache, config, store).await
}

async fn pour(
  job: &NodeJob,
  bottle: &ViewBottle,
  mirror: &str,
  work: &Path,
  cache: &ArtifactCache,
  store: &StoreDirs,
) -> Result<CachedArtifact, ExecuteError> {
  let view = &job.view;
  let url = format!("{}/{}", mirror.trim_end_matches('/'), bottle_file_name(view, &bottle.tag));
  info!(formula = %view.name, tag = %bottle.tag, "pouring bottle");

  let archive = fetch_verified(&[&url], &bottle.sha256, &store.downloads).await?;
  let unpacked = work.join("bottle");
  unpack_into(&archive, &unpacked).await?;

  let keg = unpacked.join(&view.name).join(view.pkg_version());
  let prefix = if keg.is_dir() {
    keg
  } else {
    enter_single_dir(&unpacked)?
  };

  Ok(
    cache
      .store_async(&job.key, &prefix, None, ArtifactOrigin::Bottle)
      .await?,
  )
}

async fn build_from_source(
  job: &NodeJob,
  work: &Path,
  cache: &ArtifactCache,
  config: &ExecuteConfig,
  store: &StoreDirs,
) -> Result<CachedArtifact, ExecuteError> {
  let view = &job.view;
  info!(formula = %view.name, version = %view.pkg_version(), "building from source");

  let src_root = work.join("src");
  let buildpath = match &view.source {
    SourceRef::Url { url, mirrors, checksum } => {
      let urls: Vec<&str> = std::iter::once(url).chain(mirrors).map(String::as_str).collect();
      let archive = fetch_verified(&urls, checksum, &store.downloads).await?;
      unpack_source(&archive, &src_root).await?
    }
    SourceRef::Git {
      repository,
      tag,
      revision,
    } => {
      git::clone_at(repository, Some(tag), revision.as_deref(), &src_root).await?;
      src_root
    }
    SourceRef::Head { repository, branch } => {
      git::clone_at(repository, branch.as_deref(), None, &src_root).await?;
      src_root
    }
  };

  let resources = stage_resources(view, &buildpath, store).await?;

  let dirs = BuildDirs {
    buildpath,
    prefix: work.join("prefix"),
    home: work.join("home"),
    tmp: work.join("tmp"),
    resources,
  };
  for dir in [&dirs.prefix, &dirs.home, &dirs.tmp] {
    tokio::fs::create_dir_all(dir).await?;
  }

  let ctx = StepContext::for_build(view, &job.deps, &dirs, config);
  let log_path = log_path(&store.logs, job)?;
  if let Some(parent) = log_path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }
  let mut log = tokio::fs::File::create(&log_path).await?;

  for (index, step) in view.install.iter().enumerate() {
    let invocation = ctx.render(&step.command, &step.args, &step.env)?;
    let command = invocation.display();
    log.write_all(format!("==> [{index}] {command}\n").as_bytes()).await?;

    let output = match cmd::run(&ctx, &invocation).await {
      Ok(output) => output,
      Err(RunError::Timeout(timeout)) => {
        log.write_all(format!("timed out after {timeout:?}\n").as_bytes()).await?;
        return Err(ExecuteError::StepTimeout { index, command, timeout });
      }
      Err(e) => {
        log.write_all(format!("{e}\n").as_bytes()).await?;
        return Err(ExecuteError::BuildStepError {
          index,
          command,
          code: None,
          output: e.to_string(),
        });
      }
    };

    let combined = output.combined();
    log.write_all(combined.as_bytes()).await?;
    if !output.success() {
      warn!(formula = %view.name, step = index, code = ?output.code, "install step failed");
      return Err(ExecuteError::BuildStepError {
        index,
        command,
        code: output.code,
        output: combined,
      });
    }
  }
  log.flush().await?;

  apply_fixups(&dirs.prefix, &view.fixups)?;

  Ok(
    cache
      .store_async(&job.key, &dirs.prefix, Some(log_path), ArtifactOrigin::Source)
      .await?,
  )
}

/// Fetch and verify every resource, then unpack each one. Nothing is
/// unpacked unless all of them verified.
async fn stage_resources(
  view: &FormulaView,
  buildpath: &Path,
  store: &StoreDirs,
) -> Result<BTreeMap<String, PathBuf>, ExecuteError> {
  let mut archives: Vec<(&ViewResource, PathBuf)> = Vec::with_capacity(view.resources.len());
  for resource in &view.resources {
    let urls: Vec<&str> = std::iter::once(&resource.url)
      .chain(&resource.mirrors)
      .map(String::as_str)
      .collect();
    let archive = fetch_verified(&urls, &resource.checksum, &store.downloads).await?;
    archives.push((resource, archive));
  }

  let mut staged = BTreeMap::new();
  for (resource, archive) in archives {
    let dest = buildpath.join("resources").join(&resource.name);
    let dir = unpack_source(&archive, &dest).await?;
    debug!(formula = %view.name, resource = %resource.name, dir = %dir.display(), "staged resource");
    staged.insert(resource.name.clone(), dir);
  }
  Ok(staged)
}

fn log_path(logs: &Path, job: &NodeJob) -> Result<PathBuf, ExecuteError> {
  let key_hash = job
    .key
    .compute_hash()
    .map_err(|e| ExecuteError::Cache(e.to_string()))?;
  Ok(
    logs
      .join(&job.view.name)
      .join(format!("{}-{}.log", job.view.pkg_version(), key_hash)),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  use crate::formula::ViewStep;
  use crate::platform::paths::CellarPaths;
  use crate::resolve::build_key;
  use crate::util::hash::ContentHash;
  use crate::util::testutil::{Entry, file_url, sh, tarball, view};
  use tempfile::TempDir;

  struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    cache: ArtifactCache,
    store: StoreDirs,
  }

  fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let paths = CellarPaths::new(&root);
    Fixture {
      cache: ArtifactCache::new(&paths),
      store: StoreDirs {
        downloads: paths.downloads_dir(),
        logs: paths.logs_dir(),
        tmp: paths.tmp_dir(),
      },
      root,
      _dir: dir,
    }
  }

  fn step(script: &str) -> ViewStep {
    let (command, args) = sh(script);
    ViewStep {
      command,
      args,
      env: BTreeMap::new(),
    }
  }

  fn job(view: FormulaView) -> NodeJob {
    let platform = "x86_64-linux".parse().unwrap();
    let key = build_key(&view, &platform, &[]).unwrap();
    NodeJob {
      view,
      key,
      deps: BTreeMap::new(),
    }
  }

  fn source_view(fx: &Fixture, name: &str) -> FormulaView {
    let (archive, checksum) = tarball(
      &fx.root,
      &format!("{name}-1.0.tar.gz"),
      &format!("{name}-1.0"),
      &[Entry("hello.sh", "#!/bin/sh\necho hello\n", true)],
    );
    FormulaView {
      source: SourceRef::Url {
        url: file_url(&archive),
        mirrors: vec![],
        checksum,
      },
      ..view(name)
    }
  }

  #[tokio::test]
  async fn builds_and_stores_prefix() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    v.install = vec![step("mkdir -p \"$CELLAR_PREFIX/bin\" && cp hello.sh \"$CELLAR_PREFIX/bin/hello\"")];

    let artifact = build_node(&job(v), &fx.cache, &ExecuteConfig::default(), &fx.store)
      .await
      .unwrap();

    assert_eq!(artifact.record.origin, ArtifactOrigin::Source);
    assert!(artifact.path.join("bin/hello").exists());
    let log = artifact.record.log_path.clone().unwrap();
    assert!(std::fs::read_to_string(log).unwrap().contains("==> [0]"));
    // The working directory is gone.
    assert_eq!(std::fs::read_dir(&fx.store.tmp).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn checksum_mismatch_runs_no_steps() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    if let SourceRef::Url { checksum, .. } = &mut v.source {
      *checksum = ContentHash("a".repeat(64));
    }
    let marker = fx.root.join("marker");
    v.install = vec![step(&format!("touch {}", marker.display()))];

    let err = build_node(&job(v), &fx.cache, &ExecuteConfig::default(), &fx.store)
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::ChecksumMismatch { .. }));
    assert!(!marker.exists());
  }

  #[tokio::test]
  async fn failing_step_stops_the_build() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    let marker = fx.root.join("marker");
    v.install = vec![
      step("echo configuring"),
      step("echo 'make: *** missing' >&2; exit 2"),
      step(&format!("touch {}", marker.display())),
    ];

    let err = build_node(&job(v), &fx.cache, &ExecuteConfig::default(), &fx.store)
      .await
      .unwrap_err();
    match err {
      ExecuteError::BuildStepError { index, code, output, .. } => {
        assert_eq!(index, 1);
        assert_eq!(code, Some(2));
        assert!(output.contains("make: *** missing"));
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(!marker.exists());
    assert!(fx.cache.records().unwrap().is_empty());
  }

  #[tokio::test]
  async fn timeout_stores_nothing() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    v.install = vec![step("mkdir -p \"$CELLAR_PREFIX\" && sleep 5")];
    let config = ExecuteConfig {
      step_timeout: Duration::from_millis(200),
      ..Default::default()
    };

    let err = build_node(&job(v), &fx.cache, &config, &fx.store).await.unwrap_err();
    assert!(matches!(err, ExecuteError::StepTimeout { index: 0, .. }));
    assert!(fx.cache.object_digests().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(&fx.store.tmp).unwrap().count(), 0);
  }

  fn with_resource(fx: &Fixture, v: &mut FormulaView, name: &str, content: &str) {
    let (archive, checksum) = tarball(
      &fx.root,
      &format!("{name}-0.1.tar.gz"),
      &format!("{name}-0.1"),
      &[Entry("setup.py", content, false)],
    );
    v.resources.push(ViewResource {
      name: name.to_string(),
      url: file_url(&archive),
      mirrors: vec![],
      checksum,
    });
  }

  #[tokio::test]
  async fn resources_are_staged_before_install() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    with_resource(&fx, &mut v, "Jinja2", "jinja");
    with_resource(&fx, &mut v, "MarkupSafe", "markupsafe");
    v.install = vec![ViewStep {
      command: "/bin/sh".to_string(),
      args: vec![
        "-c".to_string(),
        "mkdir -p \"$CELLAR_PREFIX\" && cat \"$1/setup.py\" resources/MarkupSafe/MarkupSafe-0.1/setup.py > \"$CELLAR_PREFIX/staged\"".to_string(),
        "sh".to_string(),
        "$${resource:Jinja2}".to_string(),
      ],
      env: BTreeMap::new(),
    }];

    let artifact = build_node(&job(v), &fx.cache, &ExecuteConfig::default(), &fx.store)
      .await
      .unwrap();
    assert_eq!(
      std::fs::read_to_string(artifact.path.join("staged")).unwrap(),
      "jinjamarkupsafe"
    );
  }

  #[tokio::test]
  async fn resource_checksum_mismatch_runs_no_steps() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    with_resource(&fx, &mut v, "future", "future");
    v.resources[0].checksum = ContentHash("c".repeat(64));
    let marker = fx.root.join("marker");
    v.install = vec![step(&format!("touch {}", marker.display()))];

    let err = build_node(&job(v), &fx.cache, &ExecuteConfig::default(), &fx.store)
      .await
      .unwrap_err();
    assert!(matches!(err, ExecuteError::ChecksumMismatch { ref origin, .. } if origin.ends_with("future-0.1.tar.gz")));
    assert!(!marker.exists());
    assert!(fx.cache.records().unwrap().is_empty());
  }

  #[tokio::test]
  async fn pours_bottle_from_mirror() {
    let fx = fixture();
    let mirror = fx.root.join("mirror");
    std::fs::create_dir_all(&mirror).unwrap();

    let mut v = view("hello");
    let file_name = bottle_file_name(&v, "x86_64_linux");
    let (_, sha256) = tarball(
      &mirror,
      &file_name,
      "hello/1.0",
      &[Entry("bin/hello", "#!/bin/sh\necho poured\n", true)],
    );
    v.bottle = Some(ViewBottle {
      tag: "x86_64_linux".to_string(),
      sha256,
    });
    // A source build would fail: the source does not exist.
    v.install = vec![step("exit 1")];

    let config = ExecuteConfig {
      bottle_mirror: Some(file_url(&mirror)),
      ..Default::default()
    };
    let artifact = build_node(&job(v), &fx.cache, &config, &fx.store).await.unwrap();
    assert_eq!(artifact.record.origin, ArtifactOrigin::Bottle);
    assert!(artifact.path.join("bin/hello").exists());
  }

  #[tokio::test]
  async fn missing_bottle_falls_back_to_source() {
    let fx = fixture();
    let mut v = source_view(&fx, "hello");
    v.bottle = Some(ViewBottle {
      tag: "x86_64_linux".to_string(),
      sha256: ContentHash("b".repeat(64)),
    });
    v.install = vec![step("mkdir -p \"$CELLAR_PREFIX/share\" && echo built > \"$CELLAR_PREFIX/share/origin\"")];

    let config = ExecuteConfig {
      bottle_mirror: Some(file_url(&fx.root.join("empty-mirror"))),
      ..Default::default()
    };
    let artifact = build_node(&job(v), &fx.cache, &config, &fx.store).await.unwrap();
    assert_eq!(artifact.record.origin, ArtifactOrigin::Source);
  }
}
