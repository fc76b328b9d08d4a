use predicates::prelude::*;

use super::common::{TestEnv, script_formula};

#[test]
fn gc_with_empty_cellar_succeeds() {
  let env = TestEnv::empty();

  env
    .cellar_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::empty();

  env
    .cellar_cmd()
    .arg("gc")
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::empty();

  env
    .cellar_cmd()
    .arg("gc")
    .args(["-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("records_deleted"))
    .stdout(predicate::str::contains("objects_deleted"))
    .stdout(predicate::str::contains("deleted_paths"));
}

#[test]
fn gc_keeps_the_latest_build() {
  let env = TestEnv::empty();
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", ""));
  env.cellar_cmd().args(["build", "greeter"]).assert().code(0);

  let output = env
    .cellar_cmd()
    .args(["gc", "--keep-days", "0", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["stats"]["records_scanned"], 1);
  assert_eq!(json["stats"]["records_deleted"], 0);
  assert_eq!(json["stats"]["objects_deleted"], 0);

  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("(cached"));
}
