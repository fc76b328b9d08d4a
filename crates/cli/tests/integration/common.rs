//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use cellar_lib::util::hash::hash_file;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the cellar root, the
/// formula directory and any source files the formulas point at.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("Formula")).unwrap();
    Self { temp }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  /// Write `Formula/<name>.toml`.
  pub fn write_formula(&self, name: &str, descriptor: &str) {
    self.write_file(&format!("Formula/{name}.toml"), descriptor);
  }

  /// Write a plain-file source and return the `url`/`checksum` lines of a
  /// descriptor pointing at it.
  pub fn source(&self, file_name: &str, content: &str) -> String {
    let path = self.write_file(&format!("sources/{file_name}"), content);
    let checksum = hash_file(&path).unwrap();
    format!("url = \"file://{}\"\nchecksum = \"{}\"\n", path.display(), checksum)
  }

  /// Cellar root (isolated per test).
  pub fn root_path(&self) -> PathBuf {
    let p = self.temp.path().join("cellar");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn formula_dir(&self) -> PathBuf {
    self.temp.path().join("Formula")
  }

  /// Get a pre-configured Command for the cellar binary.
  ///
  /// Sets `CELLAR_ROOT` and `CELLAR_FORMULA_DIR` to paths inside the temp
  /// directory and caps concurrency.
  pub fn cellar_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("cellar");
    cmd.env("CELLAR_ROOT", self.root_path());
    cmd.env("CELLAR_FORMULA_DIR", self.formula_dir());
    cmd.env("CELLAR_JOBS", "2");
    cmd.env_remove("CELLAR_BOTTLE_MIRROR");
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

/// A formula whose single source file becomes `bin/<name>`, printing `greeting`.
pub fn script_formula(env: &TestEnv, name: &str, greeting: &str, extra: &str) -> String {
  let source = env.source(&format!("{name}.sh"), &format!("#!/bin/sh\necho {greeting}\n"));
  format!(
    r#"name = "{name}"
version = "1.0"
{source}
[[install]]
command = "/bin/sh"
args = ['-c', 'mkdir -p "$CELLAR_PREFIX/bin" && cp {name}.sh "$CELLAR_PREFIX/bin/{name}" && chmod +x "$CELLAR_PREFIX/bin/{name}"']
{extra}"#
  )
}
