//! Predicate-free views of a formula for one platform.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::platform::Platform;
use crate::util::hash::{ContentHash, Hashable};

use super::types::{DepKind, Fixup, Formula, SourceRef, TestStepKind, pkg_version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewDependency {
  pub name: String,
  pub kind: DepKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewStep {
  pub command: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewResource {
  pub name: String,
  pub url: String,
  pub mirrors: Vec<String>,
  pub checksum: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewBottle {
  pub tag: String,
  pub sha256: ContentHash,
}

/// A formula with every platform predicate evaluated.
///
/// Only fields that influence the produced artifact are part of the view, so
/// its hash changes exactly when a rebuild is warranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaView {
  pub name: String,
  pub version: String,
  pub revision: u32,
  pub source: SourceRef,
  pub resources: Vec<ViewResource>,
  pub dependencies: Vec<ViewDependency>,
  pub install: Vec<ViewStep>,
  pub fixups: Vec<Fixup>,
  pub tests: Vec<TestStepKind>,
  pub bottle: Option<ViewBottle>,
  pub keg_only: Option<String>,
}

impl Hashable for FormulaView {}

impl FormulaView {
  pub fn pkg_version(&self) -> String {
    pkg_version(&self.version, self.revision)
  }

  /// Dependencies whose edges order the build.
  pub fn build_dependencies(&self) -> impl Iterator<Item = &ViewDependency> {
    self.dependencies.iter().filter(|d| d.kind.orders_build())
  }

  pub fn test_dependencies(&self) -> impl Iterator<Item = &ViewDependency> {
    self.dependencies.iter().filter(|d| d.kind == DepKind::Test)
  }
}

/// Evaluate every predicate of `formula` against `platform`.
///
/// Pure: the same formula and platform always produce the same view.
pub fn resolve_platform_view(formula: &Formula, platform: &Platform) -> FormulaView {
  let applies = |on: &Option<super::Predicate>| {
    on.as_ref()
      .is_none_or(|p| p.evaluate(platform, &formula.fails_with))
  };

  let mut dependencies: Vec<ViewDependency> = Vec::new();
  for dep in formula.dependencies.iter().filter(|d| applies(&d.on)) {
    let entry = ViewDependency {
      name: dep.name.clone(),
      kind: dep.kind,
    };
    if !dependencies.contains(&entry) {
      dependencies.push(entry);
    }
  }

  let bottle = platform.bottle_tag().and_then(|tag| {
    formula.bottle.get(&tag).map(|sha256| ViewBottle {
      tag,
      sha256: sha256.clone(),
    })
  });

  FormulaView {
    name: formula.name.clone(),
    version: formula.version.clone(),
    revision: formula.revision,
    source: formula.source.clone(),
    resources: formula
      .resources
      .iter()
      .filter(|r| applies(&r.on))
      .map(|r| ViewResource {
        name: r.name.clone(),
        url: r.url.clone(),
        mirrors: r.mirrors.clone(),
        checksum: r.checksum.clone(),
      })
      .collect(),
    dependencies,
    install: formula
      .install
      .iter()
      .filter(|s| applies(&s.on))
      .map(|s| ViewStep {
        command: s.command.clone(),
        args: s.args.clone(),
        env: s.env.clone(),
      })
      .collect(),
    fixups: formula.fixups.clone(),
    tests: formula
      .tests
      .iter()
      .filter(|t| applies(&t.on))
      .map(|t| t.kind.clone())
      .collect(),
    bottle,
    keg_only: formula.keg_only.clone(),
  }
}
