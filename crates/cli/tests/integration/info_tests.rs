use predicates::prelude::*;

use super::common::{TestEnv, script_formula};

fn setup() -> TestEnv {
  let env = TestEnv::empty();
  env.write_formula("lib", &script_formula(&env, "lib", "lib", ""));
  env.write_formula(
    "app",
    &script_formula(
      &env,
      "app",
      "app",
      "\n[[dependencies]]\nname = \"lib\"\n\n[[dependencies]]\nname = \"mac-only\"\non = \"on_macos\"\n",
    ),
  );
  env.write_formula("mac-only", &script_formula(&env, "mac-only", "mac", ""));
  env
}

#[test]
fn info_shows_build_order_for_platform() {
  let env = setup();

  env
    .cellar_cmd()
    .args(["info", "app", "--platform", "x86_64-linux"])
    .assert()
    .success()
    .stdout(predicate::str::contains("app 1.0 (x86_64-linux)"))
    .stdout(predicate::str::contains("lib 1.0 (not built)"))
    .stdout(predicate::str::contains("mac-only").not());
}

#[test]
fn info_json_includes_macos_only_edges_on_macos() {
  let env = setup();

  let output = env
    .cellar_cmd()
    .args(["info", "app", "--platform", "arm64_sonoma", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["formula"]["name"], "app");
  let order: Vec<&str> = json["build_order"]
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["name"].as_str().unwrap())
    .collect();
  assert_eq!(order.len(), 3);
  assert_eq!(order[2], "app");
  assert!(order.contains(&"mac-only"));
}
