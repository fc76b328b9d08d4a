//! The immutable environment every install and test step runs in.
//!
//! A [`StepContext`] is built once per node phase and never mutated. It owns
//! the placeholder values and the base environment; a step only ever adds its
//! own `env` entries on top when it is rendered into an [`Invocation`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::consts::SOURCE_DATE_EPOCH;
use crate::formula::FormulaView;
use crate::placeholder::{Placeholder, PlaceholderError, Resolver, substitute};

use super::types::ExecuteConfig;

/// A step with every placeholder substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  /// Base environment merged with the step's own entries.
  pub env: BTreeMap<String, String>,
}

impl Invocation {
  /// `program arg1 arg2`, for logs and error messages.
  pub fn display(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

#[derive(Debug, Clone)]
pub struct StepContext {
  name: String,
  version: String,
  prefix: PathBuf,
  buildpath: Option<PathBuf>,
  testpath: Option<PathBuf>,
  deps: BTreeMap<String, PathBuf>,
  resources: BTreeMap<String, PathBuf>,
  cwd: PathBuf,
  env: BTreeMap<String, String>,
  timeout: Duration,
}

/// Directories of one build's working area.
#[derive(Debug, Clone)]
pub struct BuildDirs {
  pub buildpath: PathBuf,
  pub prefix: PathBuf,
  pub home: PathBuf,
  pub tmp: PathBuf,
  /// Staged directory of every resource, by name.
  pub resources: BTreeMap<String, PathBuf>,
}

impl StepContext {
  /// Context for install steps: cwd is the build path, HOME and TMPDIR live
  /// inside the working directory.
  pub fn for_build(
    view: &FormulaView,
    deps: &BTreeMap<String, PathBuf>,
    dirs: &BuildDirs,
    config: &ExecuteConfig,
  ) -> Self {
    let bins: Vec<PathBuf> = deps.values().map(|p| p.join("bin")).collect();
    let env = base_env(&dirs.prefix, deps, &bins, &dirs.home, &dirs.tmp, &config.system_path);
    Self {
      name: view.name.clone(),
      version: view.version.clone(),
      prefix: dirs.prefix.clone(),
      buildpath: Some(dirs.buildpath.clone()),
      testpath: None,
      deps: deps.clone(),
      resources: dirs.resources.clone(),
      cwd: dirs.buildpath.clone(),
      env,
      timeout: config.step_timeout,
    }
  }

  /// Context for test steps: everything happens inside `testpath`, and the
  /// artifact's own `bin` comes first on PATH.
  pub fn for_test(
    view: &FormulaView,
    artifact: &Path,
    deps: &BTreeMap<String, PathBuf>,
    testpath: &Path,
    config: &ExecuteConfig,
  ) -> Self {
    let bins: Vec<PathBuf> = std::iter::once(artifact.join("bin"))
      .chain(deps.values().map(|p| p.join("bin")))
      .collect();
    let mut env = base_env(artifact, deps, &bins, testpath, testpath, &config.system_path);
    env.insert("CELLAR_TESTPATH".to_string(), testpath.display().to_string());
    Self {
      name: view.name.clone(),
      version: view.version.clone(),
      prefix: artifact.to_path_buf(),
      buildpath: None,
      testpath: Some(testpath.to_path_buf()),
      deps: deps.clone(),
      resources: BTreeMap::new(),
      cwd: testpath.to_path_buf(),
      env,
      timeout: config.step_timeout,
    }
  }

  pub fn prefix(&self) -> &Path {
    &self.prefix
  }

  pub fn cwd(&self) -> &Path {
    &self.cwd
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  /// Substitute placeholders in `input`.
  pub fn expand(&self, input: &str) -> Result<String, PlaceholderError> {
    substitute(input, self)
  }

  /// Render a step into a ready-to-spawn invocation.
  pub fn render(
    &self,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
  ) -> Result<Invocation, PlaceholderError> {
    let program = self.expand(command)?;
    let args = args.iter().map(|a| self.expand(a)).collect::<Result<Vec<_>, _>>()?;
    let mut merged = self.env.clone();
    for (key, value) in env {
      merged.insert(key.clone(), self.expand(value)?);
    }
    Ok(Invocation {
      program,
      args,
      env: merged,
    })
  }
}

impl Resolver for StepContext {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError> {
    let path = |p: &Path| p.display().to_string();
    match placeholder {
      Placeholder::Prefix(None) => Ok(path(&self.prefix)),
      Placeholder::Prefix(Some(sub)) => Ok(path(&self.prefix.join(sub))),
      Placeholder::BuildPath => self
        .buildpath
        .as_deref()
        .map(path)
        .ok_or_else(|| PlaceholderError::Unavailable("buildpath".to_string())),
      Placeholder::TestPath => self
        .testpath
        .as_deref()
        .map(path)
        .ok_or_else(|| PlaceholderError::Unavailable("testpath".to_string())),
      Placeholder::Version => Ok(self.version.clone()),
      Placeholder::Name => Ok(self.name.clone()),
      Placeholder::Dep(name) => self
        .deps
        .get(name)
        .map(|p| path(p))
        .ok_or_else(|| PlaceholderError::UnknownDependency(name.clone())),
      Placeholder::Resource(name) => self
        .resources
        .get(name)
        .map(|p| path(p))
        .ok_or_else(|| PlaceholderError::UnknownResource(name.clone())),
    }
  }
}

/// `CELLAR_DEP_<NAME>` for a dependency: uppercase, every other character
/// becomes `_`.
pub fn dep_env_name(name: &str) -> String {
  let suffix: String = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect();
  format!("CELLAR_DEP_{suffix}")
}

fn base_env(
  prefix: &Path,
  deps: &BTreeMap<String, PathBuf>,
  bins: &[PathBuf],
  home: &Path,
  tmp: &Path,
  system_path: &str,
) -> BTreeMap<String, String> {
  let mut path_entries: Vec<String> = bins.iter().map(|p| p.display().to_string()).collect();
  if !system_path.is_empty() {
    path_entries.push(system_path.to_string());
  }

  let tmp = tmp.display().to_string();
  let mut env = BTreeMap::from([
    ("PATH".to_string(), path_entries.join(":")),
    ("HOME".to_string(), home.display().to_string()),
    ("TMPDIR".to_string(), tmp.clone()),
    ("TMP".to_string(), tmp.clone()),
    ("TEMP".to_string(), tmp),
    ("LANG".to_string(), "C".to_string()),
    ("LC_ALL".to_string(), "C".to_string()),
    ("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.to_string()),
    ("CELLAR_PREFIX".to_string(), prefix.display().to_string()),
  ]);

  for (name, dep) in deps {
    env.insert(dep_env_name(name), dep.display().to_string());
  }
  if !deps.is_empty() {
    let joined: Vec<String> = deps.values().map(|p| p.display().to_string()).collect();
    env.insert("CMAKE_PREFIX_PATH".to_string(), joined.join(":"));
  }
  env
}
