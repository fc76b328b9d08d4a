use predicates::prelude::*;

use super::common::{TestEnv, script_formula};

const RELEASES: &str = r#"{ "versions": ["1.0", "1.2", "1.10", "2.0-rc1"] }"#;

fn setup() -> TestEnv {
  let env = TestEnv::empty();
  let releases = env.write_file("releases.json", RELEASES);
  let livecheck = format!(
    r#"
[livecheck]
url = "file://{}"
strategy = "json"
pipeline = [{{ op = "get", path = "versions" }}]
regex = '^(\d+(?:\.\d+)+)$'
"#,
    releases.display()
  );
  env.write_formula("tracked", &script_formula(&env, "tracked", "t", &livecheck));
  env.write_formula(
    "quiet",
    &script_formula(&env, "quiet", "q", "\n[livecheck]\nskip = \"vendored\"\n"),
  );
  env
}

#[test]
fn livecheck_reports_newer_version() {
  let env = setup();

  env
    .cellar_cmd()
    .args(["livecheck", "tracked"])
    .assert()
    .success()
    .stdout(predicate::str::contains("tracked : 1.0 → 1.10"));
}

#[test]
fn livecheck_all_json() {
  let env = setup();

  let output = env
    .cellar_cmd()
    .args(["livecheck", "--all", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let results = json.as_array().unwrap();
  assert_eq!(results.len(), 2);
  // Registry order is file-name order.
  assert_eq!(results[0]["formula"], "quiet");
  assert_eq!(results[0]["status"], "skipped");
  assert_eq!(results[1]["formula"], "tracked");
  assert_eq!(results[1]["status"], "outdated");
  assert_eq!(results[1]["latest"], "1.10");
}
