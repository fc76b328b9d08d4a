use std::time::Duration;

use cellar_lib::livecheck::{LivecheckConfig, LivecheckService, LivecheckStatus};

use super::common::Workspace;

const RELEASES: &str = r#"{
  "releases": {
    "3.4": { "children": [
      { "release_number": "3.4.5", "status": "stable" },
      { "release_number": "3.4.6", "status": "rc" }
    ] },
    "3.3": { "children": [
      { "release_number": "3.3.13", "status": "stable" },
      { "release_number": null, "status": "stable" }
    ] }
  }
}"#;

fn service() -> LivecheckService {
  LivecheckService::new(LivecheckConfig {
    jobs: 2,
    timeout: Duration::from_secs(10),
    ..Default::default()
  })
  .unwrap()
}

#[tokio::test]
async fn registry_formulas_are_checked_in_order() {
  let mut ws = Workspace::new();
  let releases = ws.path("releases.json");
  std::fs::write(&releases, RELEASES).unwrap();

  let source = ws.source("mariadb-connector-c", "3.4.4", &[("README", "x", false)]);
  ws.add(&format!(
    r#"name = "mariadb-connector-c"
version = "3.4.4"
{source}
[livecheck]
url = "file://{}"
strategy = "json"
pipeline = [
  {{ op = "get", path = "releases" }},
  {{ op = "values" }},
  {{ op = "map", pipeline = [
    {{ op = "get", path = "children" }},
    {{ op = "filter", path = "status", equals = "stable" }},
    {{ op = "get", path = "release_number" }},
  ] }},
  {{ op = "flatten" }},
]
"#,
    releases.display()
  ));
  ws.add(
    "name = \"git-mob\"\nversion = \"4.0.0\"\nrepository = \"file:///nonexistent/git-mob.git\"\ntag = \"v4.0.0\"\n",
  );
  let source = ws.source("vendored", "1.0", &[("README", "x", false)]);
  ws.add(&format!("name = \"vendored\"\nversion = \"1.0\"\n{source}"));

  let results = service().check_all(ws.registry.formulas()).await;

  assert_eq!(results.len(), 3);
  assert_eq!(results[0].formula, "mariadb-connector-c");
  assert_eq!(results[0].status, LivecheckStatus::Outdated);
  assert_eq!(results[0].latest.as_deref(), Some("3.4.5"));

  // Inferred from the git source; the remote does not exist.
  assert_eq!(results[1].formula, "git-mob");
  assert_eq!(results[1].status, LivecheckStatus::Unreachable);

  assert_eq!(results[2].status, LivecheckStatus::Skipped);
}

#[tokio::test]
async fn results_serialize_with_snake_case_status() {
  let mut ws = Workspace::new();
  let source = ws.source("quiet", "1.0", &[("README", "x", false)]);
  ws.add(&format!("name = \"quiet\"\nversion = \"1.0\"\n{source}[livecheck]\nskip = \"no releases\"\n"));

  let results = service().check_all(ws.registry.formulas()).await;
  let json = serde_json::to_value(&results[0]).unwrap();
  assert_eq!(json["status"], "skipped");
  assert_eq!(json["message"], "no releases");
  assert!(json.get("latest").is_none());
}
