//! CLI smoke tests for cellar.
//!
//! Every command runs without panicking and maps failures to the documented
//! exit codes.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

fn cellar_cmd() -> Command {
  cargo_bin_cmd!("cellar")
}

/// A cellar root and an empty formula directory.
fn isolated() -> (TempDir, Command) {
  let temp = TempDir::new().unwrap();
  std::fs::create_dir_all(temp.path().join("Formula")).unwrap();
  let mut cmd = cellar_cmd();
  cmd.env("CELLAR_ROOT", temp.path().join("cellar"));
  cmd.env("CELLAR_FORMULA_DIR", temp.path().join("Formula"));
  (temp, cmd)
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cellar_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cellar_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("cellar"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "livecheck", "info", "gc"] {
    cellar_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Usage errors
// =============================================================================

#[test]
fn build_requires_a_formula() {
  cellar_cmd().arg("build").assert().failure().code(2);
}

#[test]
fn livecheck_requires_formulas_or_all() {
  cellar_cmd().arg("livecheck").assert().failure().code(2);
}

// =============================================================================
// Unknown names
// =============================================================================

#[test]
#[serial]
fn build_unknown_formula_exits_2() {
  let (_temp, mut cmd) = isolated();
  cmd
    .args(["build", "nope"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("no formula named 'nope'"));
}

#[test]
#[serial]
fn livecheck_unknown_formula_exits_2() {
  let (_temp, mut cmd) = isolated();
  cmd.args(["livecheck", "nope"]).assert().code(2);
}

#[test]
#[serial]
fn info_unknown_formula_exits_2() {
  let (_temp, mut cmd) = isolated();
  cmd.args(["info", "nope"]).assert().code(2);
}

#[test]
#[serial]
fn invalid_platform_exits_2() {
  let (_temp, mut cmd) = isolated();
  cmd
    .args(["build", "nope", "--platform", "sparc-plan9"])
    .assert()
    .code(2);
}

#[test]
#[serial]
fn livecheck_all_on_empty_directory_succeeds() {
  let (_temp, mut cmd) = isolated();
  cmd
    .args(["livecheck", "--all"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Checked: 0"));
}
