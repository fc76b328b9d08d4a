//! Dependency resolution.
//!
//! Turns platform views into a [`ResolvedPlan`]: a topological order where
//! every build/runtime dependency precedes its dependents, ties broken by
//! declaration order. Test dependencies do not order the build; they only
//! gate the test phase, but a cycle through them is still an error since
//! the test phase could never start.

mod key;

pub use key::{build_key, closure_digest, rebuild_needed};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::formula::{FormulaRegistry, FormulaView, ValidationError, resolve_platform_view};
use crate::platform::Platform;

/// The dependency graph has a cycle; `members` is the shortest one found,
/// each member depending on the next and the last on the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", cycle_display(members))]
pub struct CycleError {
  pub members: Vec<String>,
}

fn cycle_display(members: &[String]) -> String {
  let mut parts: Vec<&str> = members.iter().map(String::as_str).collect();
  if let Some(first) = members.first() {
    parts.push(first);
  }
  parts.join(" -> ")
}

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Cycle(#[from] CycleError),
  #[error("no formula named '{0}'")]
  UnknownFormula(String),
}

/// One formula in a plan, with its edges as indices into the plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
  pub view: FormulaView,
  /// Build and runtime dependencies.
  pub build_deps: Vec<usize>,
  /// Test-only dependencies.
  pub test_deps: Vec<usize>,
}

impl PlanNode {
  pub fn name(&self) -> &str {
    &self.view.name
  }
}

/// Topologically ordered, platform-resolved formulas. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
  platform: Platform,
  nodes: Vec<PlanNode>,
  index: HashMap<String, usize>,
}

impl ResolvedPlan {
  pub fn platform(&self) -> &Platform {
    &self.platform
  }

  pub fn nodes(&self) -> &[PlanNode] {
    &self.nodes
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  pub fn get(&self, name: &str) -> Option<&PlanNode> {
    self.position(name).map(|i| &self.nodes[i])
  }

  /// Names in build order.
  pub fn order(&self) -> Vec<&str> {
    self.nodes.iter().map(PlanNode::name).collect()
  }

  /// Nodes waiting on `idx`, through either kind of edge.
  pub fn dependents(&self, idx: usize) -> Vec<usize> {
    self
      .nodes
      .iter()
      .enumerate()
      .filter(|(_, n)| n.build_deps.contains(&idx) || n.test_deps.contains(&idx))
      .map(|(i, _)| i)
      .collect()
  }
}

pub struct DependencyResolver<'a> {
  registry: &'a FormulaRegistry,
  platform: Platform,
  include_test_deps: bool,
}

impl<'a> DependencyResolver<'a> {
  pub fn new(registry: &'a FormulaRegistry, platform: Platform) -> Self {
    Self {
      registry,
      platform,
      include_test_deps: true,
    }
  }

  /// Whether test-only dependencies are pulled into plans (default true).
  pub fn with_test_dependencies(mut self, include: bool) -> Self {
    self.include_test_deps = include;
    self
  }

  /// Plan `targets` and everything they depend on.
  ///
  /// Declaration order is depth-first discovery order from the targets.
  pub fn plan(&self, targets: &[&str]) -> Result<ResolvedPlan, ResolveError> {
    let mut views: Vec<FormulaView> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for target in targets {
      if !self.registry.contains(target) {
        return Err(ResolveError::UnknownFormula(target.to_string()));
      }
      self.discover(target, &mut seen, &mut views)?;
    }

    resolve_views(views, self.platform, self.include_test_deps)
  }

  /// Plan every formula in the registry, in registry order.
  pub fn plan_all(&self) -> Result<ResolvedPlan, ResolveError> {
    let views = self
      .registry
      .formulas()
      .iter()
      .map(|f| resolve_platform_view(f, &self.platform))
      .collect();
    resolve_views(views, self.platform, self.include_test_deps)
  }

  fn discover(&self, name: &str, seen: &mut HashSet<String>, views: &mut Vec<FormulaView>) -> Result<(), ResolveError> {
    if !seen.insert(name.to_string()) {
      return Ok(());
    }
    let Some(formula) = self.registry.get(name) else {
      return Err(ResolveError::UnknownFormula(name.to_string()));
    };
    let view = resolve_platform_view(formula, &self.platform);
    let deps: Vec<String> = view
      .dependencies
      .iter()
      .filter(|d| self.include_test_deps || d.kind.orders_build())
      .map(|d| d.name.clone())
      .collect();
    views.push(view);

    for dep in deps {
      if !self.registry.contains(&dep) {
        return Err(unknown_dependency(formula_dep_field(self.registry, name, &dep), name, &dep).into());
      }
      self.discover(&dep, seen, views)?;
    }
    Ok(())
  }
}

fn formula_dep_field(registry: &FormulaRegistry, formula: &str, dep: &str) -> String {
  let index = registry
    .get(formula)
    .and_then(|f| f.dependencies.iter().position(|d| d.name == dep))
    .unwrap_or_default();
  format!("dependencies[{index}].name")
}

fn unknown_dependency(field: String, formula: &str, dep: &str) -> ValidationError {
  ValidationError::new(formula, field, format!("unknown dependency '{dep}'"))
}

/// Order `views` into a plan.
///
/// `views` order is the declaration order used to break ties. Every
/// dependency must name a view in the set.
pub fn resolve(views: Vec<FormulaView>, platform: Platform) -> Result<ResolvedPlan, ResolveError> {
  resolve_views(views, platform, true)
}

fn resolve_views(views: Vec<FormulaView>, platform: Platform, with_tests: bool) -> Result<ResolvedPlan, ResolveError> {
  let index: HashMap<&str, usize> = views.iter().enumerate().map(|(i, v)| (v.name.as_str(), i)).collect();

  let mut build_deps: Vec<Vec<usize>> = vec![Vec::new(); views.len()];
  let mut test_deps: Vec<Vec<usize>> = vec![Vec::new(); views.len()];
  for (i, view) in views.iter().enumerate() {
    for (d, dep) in view.dependencies.iter().enumerate() {
      if !with_tests && !dep.kind.orders_build() {
        continue;
      }
      let Some(&j) = index.get(dep.name.as_str()) else {
        return Err(unknown_dependency(format!("dependencies[{d}].name"), &view.name, &dep.name).into());
      };
      let edges = if dep.kind.orders_build() {
        &mut build_deps[i]
      } else {
        &mut test_deps[i]
      };
      if !edges.contains(&j) {
        edges.push(j);
      }
    }
  }

  // Kahn's algorithm; the heap yields the lowest declaration index first.
  let mut remaining: Vec<usize> = build_deps.iter().map(Vec::len).collect();
  let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); views.len()];
  for (i, deps) in build_deps.iter().enumerate() {
    for &j in deps {
      dependents[j].push(i);
    }
  }
  let mut ready: BinaryHeap<Reverse<usize>> = (0..views.len())
    .filter(|&i| remaining[i] == 0)
    .map(Reverse)
    .collect();
  let mut order = Vec::with_capacity(views.len());
  while let Some(Reverse(i)) = ready.pop() {
    order.push(i);
    for &d in &dependents[i] {
      remaining[d] -= 1;
      if remaining[d] == 0 {
        ready.push(Reverse(d));
      }
    }
  }

  if order.len() < views.len() {
    return Err(shortest_cycle(&views, &build_deps, &[]).into());
  }
  if test_deps.iter().any(|t| !t.is_empty()) && has_cycle(&build_deps, &test_deps) {
    return Err(shortest_cycle(&views, &build_deps, &test_deps).into());
  }

  let mut position = vec![0; views.len()];
  for (pos, &i) in order.iter().enumerate() {
    position[i] = pos;
  }
  let mut slots: Vec<Option<FormulaView>> = views.into_iter().map(Some).collect();
  let mut nodes = Vec::with_capacity(order.len());
  for &i in &order {
    let Some(view) = slots[i].take() else {
      continue;
    };
    nodes.push(PlanNode {
      view,
      build_deps: build_deps[i].iter().map(|&j| position[j]).collect(),
      test_deps: test_deps[i].iter().map(|&j| position[j]).collect(),
    });
  }
  let index = nodes.iter().enumerate().map(|(i, n)| (n.view.name.clone(), i)).collect();

  debug!(platform = %platform, order = ?nodes.iter().map(PlanNode::name).collect::<Vec<_>>(), "resolved plan");
  Ok(ResolvedPlan { platform, nodes, index })
}

fn graph(build_deps: &[Vec<usize>], test_deps: &[Vec<usize>]) -> DiGraph<usize, ()> {
  let mut graph = DiGraph::new();
  let nodes: Vec<NodeIndex> = (0..build_deps.len()).map(|i| graph.add_node(i)).collect();
  for (i, deps) in build_deps.iter().enumerate() {
    for &j in deps.iter().chain(test_deps.get(i).into_iter().flatten()) {
      // Edges point from dependent to dependency.
      graph.add_edge(nodes[i], nodes[j], ());
    }
  }
  graph
}

fn has_cycle(build_deps: &[Vec<usize>], test_deps: &[Vec<usize>]) -> bool {
  petgraph::algo::is_cyclic_directed(&graph(build_deps, test_deps))
}

/// Find the shortest cycle, preferring the one through the lowest declaration
/// index, rotated to start at its lowest member.
fn shortest_cycle(views: &[FormulaView], build_deps: &[Vec<usize>], test_deps: &[Vec<usize>]) -> CycleError {
  let g = graph(build_deps, test_deps);
  let mut best: Option<Vec<usize>> = None;

  for scc in tarjan_scc(&g) {
    let members: HashSet<usize> = scc.iter().map(|n| g[*n]).collect();
    let self_loop = scc.len() == 1 && g.contains_edge(scc[0], scc[0]);
    if scc.len() < 2 && !self_loop {
      continue;
    }
    let mut starts: Vec<usize> = members.iter().copied().collect();
    starts.sort_unstable();
    for start in starts {
      if let Some(cycle) = bfs_cycle(&g, start, &members)
        && best.as_ref().is_none_or(|b| cycle.len() < b.len())
      {
        best = Some(cycle);
      }
    }
  }

  let mut cycle = best.unwrap_or_default();
  if let Some(min_pos) = cycle.iter().enumerate().min_by_key(|(_, i)| **i).map(|(p, _)| p) {
    cycle.rotate_left(min_pos);
  }
  CycleError {
    members: cycle.into_iter().map(|i| views[i].name.clone()).collect(),
  }
}

/// Shortest path from `start` back to itself within `members`.
fn bfs_cycle(g: &DiGraph<usize, ()>, start: usize, members: &HashSet<usize>) -> Option<Vec<usize>> {
  let start_node = NodeIndex::new(start);
  let mut parent: HashMap<usize, usize> = HashMap::new();
  let mut queue = VecDeque::from([start]);
  let mut visited: HashSet<usize> = HashSet::from([start]);

  while let Some(current) = queue.pop_front() {
    for next in g.neighbors(NodeIndex::new(current)) {
      let next_idx = g[next];
      if next == start_node {
        let mut path = vec![current];
        let mut cursor = current;
        while cursor != start {
          cursor = parent[&cursor];
          path.push(cursor);
        }
        path.reverse();
        return Some(path);
      }
      if members.contains(&next_idx) && visited.insert(next_idx) {
        parent.insert(next_idx, current);
        queue.push_back(next_idx);
      }
    }
  }
  None
}
