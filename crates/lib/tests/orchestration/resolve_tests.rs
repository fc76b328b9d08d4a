use cellar_lib::resolve::{DependencyResolver, ResolveError};

use super::common::Workspace;

const CHECKSUM: &str = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23";

fn descriptor(name: &str, deps: &str) -> String {
  format!("name = \"{name}\"\nversion = \"1.0\"\nurl = \"https://example.org/{name}.tar.gz\"\nchecksum = \"{CHECKSUM}\"\n{deps}")
}

fn dep(name: &str, extra: &str) -> String {
  format!("\n[[dependencies]]\nname = \"{name}\"\n{extra}\n")
}

#[test]
fn chain_is_ordered_dependencies_first() {
  let mut ws = Workspace::new();
  ws.add(&descriptor("a", &dep("b", "")));
  ws.add(&descriptor("b", &dep("c", "")));
  ws.add(&descriptor("c", ""));

  let plan = DependencyResolver::new(&ws.registry, Workspace::platform())
    .plan(&["a"])
    .unwrap();
  assert_eq!(plan.order(), vec!["c", "b", "a"]);
}

#[test]
fn two_node_cycle_is_reported() {
  let mut ws = Workspace::new();
  ws.add(&descriptor("a", &dep("b", "")));
  ws.add(&descriptor("b", &dep("a", "")));

  let err = DependencyResolver::new(&ws.registry, Workspace::platform())
    .plan(&["a"])
    .unwrap_err();
  match err {
    ResolveError::Cycle(cycle) => {
      let mut members = cycle.members.clone();
      members.sort();
      assert_eq!(members, vec!["a", "b"]);
    }
    other => panic!("expected a cycle, got {other}"),
  }
}

#[test]
fn platform_predicates_prune_edges() {
  let mut ws = Workspace::new();
  ws.add(&descriptor(
    "tool",
    &format!("{}{}", dep("linux-only", "on = \"on_linux\""), dep("mac-only", "on = \"on_macos\"")),
  ));
  ws.add(&descriptor("linux-only", ""));
  ws.add(&descriptor("mac-only", ""));

  let plan = DependencyResolver::new(&ws.registry, Workspace::platform())
    .plan(&["tool"])
    .unwrap();
  assert_eq!(plan.order(), vec!["linux-only", "tool"]);
}

#[test]
fn test_dependencies_are_optional_in_plans() {
  let mut ws = Workspace::new();
  ws.add(&descriptor("tool", &dep("fixture", "kind = \"test\"")));
  ws.add(&descriptor("fixture", ""));

  let with = DependencyResolver::new(&ws.registry, Workspace::platform())
    .plan(&["tool"])
    .unwrap();
  assert_eq!(with.len(), 2);

  let without = DependencyResolver::new(&ws.registry, Workspace::platform())
    .with_test_dependencies(false)
    .plan(&["tool"])
    .unwrap();
  assert_eq!(without.order(), vec!["tool"]);
}

#[test]
fn unknown_names_are_errors() {
  let mut ws = Workspace::new();
  ws.add(&descriptor("a", &dep("ghost", "")));
  let resolver = DependencyResolver::new(&ws.registry, Workspace::platform());

  assert!(matches!(resolver.plan(&["nope"]), Err(ResolveError::UnknownFormula(n)) if n == "nope"));
  match resolver.plan(&["a"]) {
    Err(ResolveError::Validation(e)) => assert_eq!(e.field, "dependencies[0].name"),
    other => panic!("expected a validation error, got {other:?}"),
  }
}
