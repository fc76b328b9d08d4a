use std::fs;

use cellar_lib::cache::RecordStatus;
use cellar_lib::execute::{ExecuteConfig, ExecuteError, NodeStatus, Phase, TestOutcome};

use super::common::Workspace;

const ADD_COAUTHOR: &str = r#"#!/bin/sh
[ $# -eq 3 ] || { echo "usage: git-add-coauthor <initials> <name> <email>" >&2; exit 2; }
printf '%s|%s|%s\n' "$1" "$2" "$3" >> "$HOME/.git-coauthors"
"#;

const MOB: &str = r#"#!/bin/sh
: > "$HOME/.gitmessage"
for initials in "$@"; do
  line=$(grep "^$initials|" "$HOME/.git-coauthors") || { echo "unknown co-author: $initials" >&2; exit 1; }
  echo "$line" | awk -F'|' '{ printf "Co-authored-by: %s <%s>\n", $2, $3 }' >> "$HOME/.gitmessage"
done
"#;

const COMMIT: &str = r#"#!/bin/sh
[ "$1" = "-m" ] || exit 2
printf '%s\n\n' "$2"
cat "$HOME/.gitmessage"
"#;

const GIT_MOB_BODY: &str = r#"
[[install]]
command = "/bin/sh"
args = ['-c', 'mkdir -p "$CELLAR_PREFIX/libexec/bin" && cp bin/* "$CELLAR_PREFIX/libexec/bin/"']

[[fixups]]
kind = "link_all"
from = "libexec/bin"
to = "bin"

[[test]]
path = ".git-coauthors"
content = ""

[[test]]
command = "git-add-coauthor"
args = ["bb", "Barry Butterworth", "barry@butterworth.org"]

[[test]]
command = "git-mob"
args = ["bb"]

[[test]]
command = "git-mob-commit"
args = ["-m", "test"]
assert = { kind = "contains", expected = "Co-authored-by: Barry Butterworth <barry@butterworth.org>" }
"#;

fn add_git_mob(ws: &mut Workspace) {
  let source = ws.source(
    "git-mob",
    "4.0.0",
    &[
      ("bin/git-add-coauthor", ADD_COAUTHOR, true),
      ("bin/git-mob", MOB, true),
      ("bin/git-mob-commit", COMMIT, true),
    ],
  );
  ws.add(&format!("name = \"git-mob\"\nversion = \"4.0.0\"\n{source}{GIT_MOB_BODY}"));
}

/// `name` installs `bin/<name>`; its build appends to `builds.log`.
fn add_simple(ws: &mut Workspace, name: &str, deps: &[(&str, &str)]) {
  let source = ws.source(name, "1.0", &[("README", name, false)]);
  let log = ws.path("builds.log");
  let mut text = format!(
    "name = \"{name}\"\nversion = \"1.0\"\n{source}\n[[install]]\ncommand = \"/bin/sh\"\n\
     args = ['-c', 'mkdir -p \"$CELLAR_PREFIX/bin\" && echo {name} > \"$CELLAR_PREFIX/bin/{name}\" && echo {name} >> {}']\n",
    log.display()
  );
  for (dep, kind) in deps {
    text.push_str(&format!("\n[[dependencies]]\nname = \"{dep}\"\nkind = \"{kind}\"\n"));
  }
  ws.add(&text);
}

fn builds(ws: &Workspace) -> Vec<String> {
  fs::read_to_string(ws.path("builds.log"))
    .unwrap_or_default()
    .lines()
    .map(str::to_string)
    .collect()
}

#[tokio::test]
async fn coauthor_trailer_end_to_end() {
  let mut ws = Workspace::new();
  add_git_mob(&mut ws);

  let report = ws.build(&["git-mob"], Workspace::config()).await;

  let node = report.get("git-mob").unwrap();
  assert!(report.is_success(), "{:?}", node.error);
  assert_eq!(node.status, NodeStatus::Built);
  assert_eq!(node.tests, TestOutcome::Passed);
  assert_eq!(report.exit_code(), 0);

  let artifact = node.artifact.clone().unwrap();
  assert_eq!(
    fs::read_link(artifact.join("bin/git-mob")).unwrap(),
    std::path::Path::new("../libexec/bin/git-mob")
  );
  let record = node.record.clone().unwrap();
  assert_eq!(record.status, RecordStatus::Built);
  assert!(record.log_path.unwrap().exists());
}

#[tokio::test]
async fn unchanged_formula_is_served_from_cache() {
  let mut ws = Workspace::new();
  add_git_mob(&mut ws);

  let first = ws.build(&["git-mob"], Workspace::config()).await;
  let second = ws.build(&["git-mob"], Workspace::config()).await;

  let (a, b) = (first.get("git-mob").unwrap(), second.get("git-mob").unwrap());
  assert_eq!(b.status, NodeStatus::Cached);
  assert_eq!(a.artifact, b.artifact);
  assert_eq!(
    a.record.as_ref().unwrap().artifact_digest,
    b.record.as_ref().unwrap().artifact_digest
  );
}

#[tokio::test]
async fn dependencies_build_first_and_are_reachable() {
  let mut ws = Workspace::new();
  add_simple(&mut ws, "c", &[]);
  add_simple(&mut ws, "b", &[("c", "runtime")]);
  add_simple(&mut ws, "a", &[("b", "build")]);

  let report = ws.build(&["a"], Workspace::config()).await;

  assert!(report.is_success());
  assert_eq!(builds(&ws), vec!["c", "b", "a"]);
  assert_eq!(report.completion_order, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn failed_build_skips_dependents_only() {
  let mut ws = Workspace::new();
  add_simple(&mut ws, "c", &[]);
  add_simple(&mut ws, "ok", &[]);
  // Declared checksum does not match the archive.
  let source = ws.source("b", "1.0", &[("README", "b", false)]);
  let source = source.replace(
    source.split('"').nth(3).unwrap(),
    "0000000000000000000000000000000000000000000000000000000000000000",
  );
  ws.add(&format!(
    "name = \"b\"\nversion = \"1.0\"\n{source}\n[[dependencies]]\nname = \"c\"\n"
  ));
  add_simple(&mut ws, "a", &[("b", "build")]);

  let report = ws.build(&["a", "ok"], Workspace::config()).await;

  let b = report.get("b").unwrap();
  assert_eq!(b.status, NodeStatus::Failed);
  assert!(matches!(
    b.error,
    Some((Phase::Build, ExecuteError::ChecksumMismatch { .. }))
  ));
  let a = report.get("a").unwrap();
  assert_eq!(a.status, NodeStatus::Skipped);
  assert_eq!(a.failed_dependency.as_deref(), Some("b"));
  assert_eq!(report.get("c").unwrap().status, NodeStatus::Built);
  assert_eq!(report.get("ok").unwrap().status, NodeStatus::Built);
  assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn failing_test_marks_record_and_exits_three() {
  let mut ws = Workspace::new();
  let source = ws.source("shout", "1.0", &[("README", "shout", false)]);
  ws.add(&format!(
    r##"name = "shout"
version = "1.0"
{source}
[[install]]
command = "/bin/sh"
args = ['-c', 'mkdir -p "$CELLAR_PREFIX/bin" && printf "#!/bin/sh\necho quiet\n" > "$CELLAR_PREFIX/bin/shout" && chmod +x "$CELLAR_PREFIX/bin/shout"']

[[test]]
command = "shout"
assert = {{ kind = "exact", expected = "LOUD" }}
"##
  ));

  let report = ws.build(&["shout"], Workspace::config()).await;

  let node = report.get("shout").unwrap();
  assert_eq!(node.status, NodeStatus::Failed);
  assert_eq!(node.tests, TestOutcome::Failed);
  match &node.error {
    Some((Phase::Test, ExecuteError::TestAssertionFailure { index, expected, actual })) => {
      assert_eq!(*index, 0);
      assert_eq!(expected, "LOUD");
      assert_eq!(actual, "quiet");
    }
    other => panic!("unexpected error: {other:?}"),
  }
  assert_eq!(node.record.as_ref().unwrap().status, RecordStatus::TestFailed);
  assert_eq!(report.exit_code(), 3);
}

#[tokio::test]
async fn no_test_flag_skips_verification() {
  let mut ws = Workspace::new();
  add_git_mob(&mut ws);

  let config = ExecuteConfig {
    run_tests: false,
    ..Workspace::config()
  };
  let report = ws.build(&["git-mob"], config).await;

  let node = report.get("git-mob").unwrap();
  assert_eq!(node.status, NodeStatus::Built);
  assert_eq!(node.tests, TestOutcome::NotRun);
}

#[tokio::test]
async fn resources_are_staged_for_install_steps() {
  let mut ws = Workspace::new();
  let source = ws.source("jinja", "3.1", &[("README", "jinja", false)]);
  let markupsafe = ws.source("markupsafe", "2.1.3", &[("VERSION", "2.1.3", false)]);
  ws.add(&format!(
    r##"name = "jinja"
version = "3.1"
{source}
[[resources]]
name = "markupsafe"
{markupsafe}
[[install]]
command = "/bin/sh"
args = ['-c', 'mkdir -p "$CELLAR_PREFIX/share" && cp "$1/VERSION" "$CELLAR_PREFIX/share/markupsafe-version"', 'sh', '$${{resource:markupsafe}}']
"##
  ));

  let report = ws.build(&["jinja"], Workspace::config()).await;

  let node = report.get("jinja").unwrap();
  assert_eq!(node.status, NodeStatus::Built, "{:?}", node.error);
  let artifact = node.artifact.clone().unwrap();
  assert_eq!(
    fs::read_to_string(artifact.join("share/markupsafe-version")).unwrap(),
    "2.1.3"
  );
}

#[tokio::test]
async fn resource_checksum_mismatch_fails_before_install() {
  let mut ws = Workspace::new();
  let source = ws.source("jinja", "3.1", &[("README", "jinja", false)]);
  let markupsafe = ws.source("markupsafe", "2.1.3", &[("VERSION", "2.1.3", false)]);
  let markupsafe = markupsafe.replace(
    markupsafe.split('"').nth(3).unwrap(),
    "1111111111111111111111111111111111111111111111111111111111111111",
  );
  ws.add(&format!(
    r##"name = "jinja"
version = "3.1"
{source}
[[resources]]
name = "markupsafe"
{markupsafe}
[[install]]
command = "/bin/sh"
args = ['-c', 'echo jinja >> "{log}"']
"##,
    log = ws.path("builds.log").display()
  ));

  let report = ws.build(&["jinja"], Workspace::config()).await;

  let node = report.get("jinja").unwrap();
  assert_eq!(node.status, NodeStatus::Failed);
  assert!(matches!(
    node.error,
    Some((Phase::Build, ExecuteError::ChecksumMismatch { .. }))
  ));
  assert!(builds(&ws).is_empty());
  assert_eq!(report.exit_code(), 1);
}
