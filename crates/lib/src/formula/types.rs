use std::collections::BTreeMap;

use serde::Serialize;

use crate::consts::HEAD_VERSION;
use crate::livecheck::pipeline::Op;
use crate::platform::{Compiler, CompilerKind};
use crate::util::hash::ContentHash;

use super::predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepKind {
  Build,
  Runtime,
  Test,
}

impl DepKind {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "build" => Some(Self::Build),
      "runtime" => Some(Self::Runtime),
      "test" => Some(Self::Test),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Build => "build",
      Self::Runtime => "runtime",
      Self::Test => "test",
    }
  }

  /// Build and runtime edges order the build; test edges gate the test phase only.
  pub fn orders_build(&self) -> bool {
    matches!(self, Self::Build | Self::Runtime)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  pub name: String,
  pub kind: DepKind,
  pub on: Option<Predicate>,
}

/// Where the sources of a formula come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
  Url {
    url: String,
    mirrors: Vec<String>,
    checksum: ContentHash,
  },
  Git {
    repository: String,
    tag: String,
    revision: Option<String>,
  },
  Head {
    repository: String,
    branch: Option<String>,
  },
}

impl SourceRef {
  /// URL or repository a livecheck `stable`/`head` source points to.
  pub fn location(&self) -> &str {
    match self {
      Self::Url { url, .. } => url,
      Self::Git { repository, .. } | Self::Head { repository, .. } => repository,
    }
  }
}

/// An extra archive staged next to the sources before the install steps run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
  pub name: String,
  pub url: String,
  pub mirrors: Vec<String>,
  pub checksum: ContentHash,
  pub on: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeadRef {
  pub repository: String,
  pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
  pub command: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub on: Option<Predicate>,
}

/// Post-install tree fixups. Paths are relative to the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fixup {
  /// Create `link` pointing at `target`.
  Symlink { target: String, link: String },
  /// Link every entry of `from` into `to`.
  LinkAll { from: String, to: String },
  /// Gzip every file in `dir` whose name ends with `suffix`.
  Gzip { dir: String, suffix: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "expected", rename_all = "snake_case")]
pub enum Assertion {
  /// Trimmed stdout equals the expected text.
  Exact(String),
  /// Expected text appears in stdout.
  Contains(String),
  ExitCode(i32),
}

impl Default for Assertion {
  fn default() -> Self {
    Self::ExitCode(0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestStepKind {
  Run {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    assertion: Assertion,
  },
  Write {
    path: String,
    content: String,
    executable: bool,
  },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
  pub kind: TestStepKind,
  pub on: Option<Predicate>,
}

/// A compiler the formula is known not to build with.
///
/// Clang entries match every build number up to and including `version`;
/// gcc entries match that major version exactly. No version matches all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailsWith {
  pub compiler: CompilerKind,
  pub version: Option<u32>,
}

impl FailsWith {
  pub fn matches(&self, compiler: &Compiler) -> bool {
    if compiler.kind != self.compiler {
      return false;
    }
    match (self.compiler, self.version) {
      (_, None) => true,
      (CompilerKind::Clang, Some(build)) => compiler.version <= build,
      (CompilerKind::Gcc, Some(major)) => compiler.version == major,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivecheckStrategy {
  Regex,
  Git,
  Json,
  Xml,
}

impl LivecheckStrategy {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "regex" => Some(Self::Regex),
      "git" => Some(Self::Git),
      "json" => Some(Self::Json),
      "xml" => Some(Self::Xml),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LivecheckSource {
  Stable,
  Head,
  Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LivecheckSpec {
  pub strategy: LivecheckStrategy,
  pub source: LivecheckSource,
  /// Known to compile; the first capture group is the version.
  pub regex: Option<String>,
  pub pipeline: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Livecheck {
  Check(LivecheckSpec),
  Skip(String),
}

/// A validated formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
  pub name: String,
  pub desc: Option<String>,
  pub homepage: Option<String>,
  pub license: Option<String>,
  pub version: String,
  pub revision: u32,
  pub source: SourceRef,
  pub resources: Vec<Resource>,
  pub head: Option<HeadRef>,
  pub dependencies: Vec<Dependency>,
  pub install: Vec<InstallStep>,
  pub fixups: Vec<Fixup>,
  pub tests: Vec<TestStep>,
  pub bottle: BTreeMap<String, ContentHash>,
  pub livecheck: Option<Livecheck>,
  pub fails_with: Vec<FailsWith>,
  pub keg_only: Option<String>,
}

impl Formula {
  /// `version`, or `version_revision` when the revision is non-zero.
  pub fn pkg_version(&self) -> String {
    pkg_version(&self.version, self.revision)
  }

  pub fn is_head_only(&self) -> bool {
    self.version == HEAD_VERSION
  }
}

pub fn pkg_version(version: &str, revision: u32) -> String {
  if revision > 0 {
    format!("{version}_{revision}")
  } else {
    version.to_string()
  }
}
