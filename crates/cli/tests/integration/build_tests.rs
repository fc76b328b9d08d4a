use predicates::prelude::*;

use super::common::{TestEnv, script_formula};

const GREETER_TEST: &str = r#"
[[test]]
command = "greeter"
assert = { kind = "contains", expected = "hello" }
"#;

#[test]
fn build_and_test_succeeds() {
  let env = TestEnv::empty();
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", GREETER_TEST));

  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("greeter 1.0 (built, tests passed"))
    .stdout(predicate::str::contains("Build complete"));
}

#[test]
fn second_build_is_cached() {
  let env = TestEnv::empty();
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", GREETER_TEST));

  env.cellar_cmd().args(["build", "greeter"]).assert().code(0);
  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("greeter 1.0 (cached"));
}

#[test]
fn failing_install_step_exits_1_and_skips_dependents() {
  let env = TestEnv::empty();
  let source = env.source("broken.sh", "exit 0\n");
  env.write_formula(
    "broken",
    &format!(
      "name = \"broken\"\nversion = \"2.0\"\n{source}\n[[install]]\ncommand = \"/bin/sh\"\nargs = ['-c', 'echo compiling; exit 7']\n"
    ),
  );
  env.write_formula(
    "app",
    &script_formula(&env, "app", "app", "\n[[dependencies]]\nname = \"broken\"\n"),
  );

  env
    .cellar_cmd()
    .args(["build", "app"])
    .assert()
    .code(1)
    .stdout(predicate::str::contains("broken 2.0 (build failed)"))
    .stdout(predicate::str::contains("compiling"))
    .stdout(predicate::str::contains("app 1.0 (skipped: dependency broken failed)"));
}

#[test]
fn failing_test_exits_3() {
  let env = TestEnv::empty();
  let test = r#"
[[test]]
command = "greeter"
assert = { kind = "exact", expected = "goodbye" }
"#;
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", test));

  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(3)
    .stdout(predicate::str::contains("greeter 1.0 (tests failed)"));
}

#[test]
fn no_test_skips_failing_tests() {
  let env = TestEnv::empty();
  let test = r#"
[[test]]
command = "greeter"
assert = { kind = "exact", expected = "goodbye" }
"#;
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", test));

  env
    .cellar_cmd()
    .args(["build", "greeter", "--no-test"])
    .assert()
    .code(0);
}

#[test]
fn dependency_cycle_exits_2() {
  let env = TestEnv::empty();
  env.write_formula(
    "a",
    &script_formula(&env, "a", "a", "\n[[dependencies]]\nname = \"b\"\n"),
  );
  env.write_formula(
    "b",
    &script_formula(&env, "b", "b", "\n[[dependencies]]\nname = \"a\"\n"),
  );

  env
    .cellar_cmd()
    .args(["build", "a"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("cycle"));
}

#[test]
fn invalid_descriptor_exits_2() {
  let env = TestEnv::empty();
  env.write_formula("bad", "name = \"bad\"\n");

  env.cellar_cmd().args(["build", "bad"]).assert().code(2);
}

#[test]
fn json_output_reports_every_node() {
  let env = TestEnv::empty();
  env.write_formula("lib", &script_formula(&env, "lib", "lib", ""));
  env.write_formula(
    "greeter",
    &script_formula(
      &env,
      "greeter",
      "hello",
      &format!("{GREETER_TEST}\n[[dependencies]]\nname = \"lib\"\nkind = \"runtime\"\n"),
    ),
  );

  let output = env
    .cellar_cmd()
    .args(["build", "greeter", "-o", "json"])
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(0));

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["success"], true);
  assert_eq!(json["exit_code"], 0);
  assert_eq!(json["completion_order"], serde_json::json!(["lib", "greeter"]));
  let nodes = json["nodes"].as_array().unwrap();
  assert_eq!(nodes.len(), 2);
  assert_eq!(nodes[1]["name"], "greeter");
  assert_eq!(nodes[1]["status"], "built");
  assert_eq!(nodes[1]["tests"], "passed");
  assert_eq!(nodes[1]["artifact_digest"].as_str().unwrap().len(), 64);
}

#[test]
fn mistyped_checksum_can_be_corrected() {
  let env = TestEnv::empty();
  let good = script_formula(&env, "greeter", "hello", "");
  let checksum = hash_line(&good);
  env.write_formula("greeter", &good.replace(&checksum, &"a".repeat(64)));

  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(1)
    .stdout(predicate::str::contains("greeter 1.0 (build failed)"));

  env.write_formula("greeter", &good);
  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(0)
    .stdout(predicate::str::contains("greeter 1.0 (built"));
}

#[test]
fn verified_checksum_is_pinned_for_its_version() {
  let env = TestEnv::empty();
  env.write_formula("greeter", &script_formula(&env, "greeter", "hello", ""));
  env.cellar_cmd().args(["build", "greeter"]).assert().code(0);

  // Same version, different source contents.
  env.write_formula("greeter", &script_formula(&env, "greeter", "howdy", ""));
  env
    .cellar_cmd()
    .args(["build", "greeter"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("immutable"));
}

/// The declared checksum in a descriptor written by `script_formula`.
fn hash_line(descriptor: &str) -> String {
  descriptor
    .lines()
    .find_map(|line| line.strip_prefix("checksum = \""))
    .and_then(|rest| rest.strip_suffix('"'))
    .unwrap()
    .to_string()
}
