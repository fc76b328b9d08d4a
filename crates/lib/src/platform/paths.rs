use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, ROOT_ENV};

/// Returns the user's home directory
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("/"))
}

/// Returns the directory for data files for the application
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the store root, honoring `CELLAR_ROOT` when set.
pub fn root_dir() -> PathBuf {
  match std::env::var_os(ROOT_ENV) {
    Some(root) if !root.is_empty() => PathBuf::from(root),
    _ => data_dir(),
  }
}

/// Layout of everything cellar keeps under its root.
///
/// ```text
/// <root>/
///   .lock
///   checksums.json
///   cache/objects/<digest>/
///   cache/records/<key>.json
///   downloads/
///   logs/
///   tmp/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellarPaths {
  root: PathBuf,
}

impl CellarPaths {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Paths rooted at [`root_dir`].
  pub fn from_env() -> Self {
    Self::new(root_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.root.join("cache")
  }

  pub fn objects_dir(&self) -> PathBuf {
    self.cache_dir().join("objects")
  }

  pub fn records_dir(&self) -> PathBuf {
    self.cache_dir().join("records")
  }

  pub fn downloads_dir(&self) -> PathBuf {
    self.root.join("downloads")
  }

  pub fn logs_dir(&self) -> PathBuf {
    self.root.join("logs")
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  pub fn checksums_file(&self) -> PathBuf {
    self.root.join("checksums.json")
  }

  pub fn lock_file(&self) -> PathBuf {
    self.root.join(".lock")
  }
}
