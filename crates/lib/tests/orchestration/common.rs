//! Shared fixtures for the end-to-end tests.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cellar_lib::cache::ArtifactCache;
use cellar_lib::execute::{BuildExecutor, ExecuteConfig, RunReport};
use cellar_lib::formula::FormulaRegistry;
use cellar_lib::platform::Platform;
use cellar_lib::platform::paths::CellarPaths;
use cellar_lib::resolve::DependencyResolver;
use cellar_lib::util::hash::hash_file;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

/// A scratch cellar root plus a place for source archives.
pub struct Workspace {
  pub dir: TempDir,
  pub paths: CellarPaths,
  pub registry: FormulaRegistry,
}

impl Workspace {
  pub fn new() -> Self {
    let dir = TempDir::new().unwrap();
    let paths = CellarPaths::new(dir.path().join("cellar"));
    Self {
      dir,
      paths,
      registry: FormulaRegistry::new(),
    }
  }

  pub fn platform() -> Platform {
    "x86_64-linux".parse().unwrap()
  }

  /// Write `<name>-<version>.tar.gz` with every entry below
  /// `<name>-<version>/`. Returns the `url`/`checksum` lines of a
  /// descriptor pointing at it.
  pub fn source(&self, name: &str, version: &str, entries: &[(&str, &str, bool)]) -> String {
    let top = format!("{name}-{version}");
    let path = self.dir.path().join(format!("{top}.tar.gz"));
    write_tarball(&path, &top, entries);
    let checksum = hash_file(&path).unwrap();
    format!("url = \"file://{}\"\nchecksum = \"{}\"\n", path.display(), checksum)
  }

  pub fn add(&mut self, descriptor: &str) {
    self.registry.insert_text(descriptor, "test").unwrap();
  }

  pub fn config() -> ExecuteConfig {
    ExecuteConfig {
      jobs: 4,
      ..Default::default()
    }
  }

  pub fn executor(&self, config: ExecuteConfig) -> BuildExecutor {
    BuildExecutor::new(&self.paths, Arc::new(ArtifactCache::new(&self.paths)), config)
  }

  pub async fn build(&self, targets: &[&str], config: ExecuteConfig) -> RunReport {
    let plan = DependencyResolver::new(&self.registry, Self::platform())
      .plan(targets)
      .unwrap();
    self.executor(config).execute(&plan).await
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.dir.path().join(rel)
  }
}

fn write_tarball(path: &Path, top: &str, entries: &[(&str, &str, bool)]) {
  let file = File::create(path).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for (rel, content, executable) in entries {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(if *executable { 0o755 } else { 0o644 });
    header.set_mtime(0);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{top}/{rel}"), content.as_bytes())
      .unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();
}
