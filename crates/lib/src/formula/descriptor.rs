//! TOML formula descriptors and their validation.
//!
//! ```toml
//! name = "zlib"
//! version = "1.3.1"
//! url = "https://zlib.net/zlib-1.3.1.tar.gz"
//! checksum = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23"
//!
//! [[dependencies]]
//! name = "pkgconf"
//! kind = "build"
//!
//! [[resources]]
//! name = "zlib-ng-compat"
//! url = "https://example.com/zlib-ng-2.2.2.tar.gz"
//! checksum = "fcb41dd59a3f17002aeb1bb21f04696c9b721404890bb945c5ab39d2cb69654c"
//!
//! [[install]]
//! command = "./configure"
//! args = ["--prefix=$${prefix}", "--with-compat=$${resource:zlib-ng-compat}"]
//!
//! [[test]]
//! command = "$${prefix:bin}/minigzip"
//! args = ["-h"]
//! assert = { kind = "exit_code", expected = 1 }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::consts::HEAD_VERSION;
use crate::livecheck::pipeline::Op;
use crate::placeholder::{self, Placeholder};
use crate::platform::{CompilerKind, Platform};
use crate::util::hash::{ContentHash, is_sha256_hex};

use super::error::{RegistryError, ValidationError};
use super::predicate::Predicate;
use super::types::*;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
  pub name: Option<String>,
  pub desc: Option<String>,
  pub homepage: Option<String>,
  pub license: Option<String>,
  pub version: Option<String>,
  #[serde(default)]
  pub revision: u32,
  pub url: Option<String>,
  #[serde(default)]
  pub mirrors: Vec<String>,
  pub checksum: Option<String>,
  pub repository: Option<String>,
  pub tag: Option<String>,
  pub revision_sha: Option<String>,
  pub head: Option<RawHead>,
  pub keg_only: Option<String>,
  #[serde(default)]
  pub resources: Vec<RawResource>,
  #[serde(default)]
  pub dependencies: Vec<RawDependency>,
  #[serde(default)]
  pub install: Vec<RawInstallStep>,
  #[serde(default)]
  pub fixups: Vec<RawFixup>,
  #[serde(default)]
  pub test: Vec<RawTestStep>,
  #[serde(default)]
  pub bottle: BTreeMap<String, String>,
  pub livecheck: Option<RawLivecheck>,
  #[serde(default)]
  pub fails_with: Vec<RawFailsWith>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawHead {
  Url(String),
  Table { url: String, branch: Option<String> },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawResource {
  pub name: Option<String>,
  pub url: Option<String>,
  #[serde(default)]
  pub mirrors: Vec<String>,
  pub checksum: Option<String>,
  pub on: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDependency {
  pub name: Option<String>,
  pub kind: Option<String>,
  pub on: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInstallStep {
  pub command: Option<String>,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  pub on: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFixup {
  pub kind: Option<String>,
  pub target: Option<String>,
  pub link: Option<String>,
  pub from: Option<String>,
  pub to: Option<String>,
  pub dir: Option<String>,
  pub suffix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTestStep {
  pub kind: Option<String>,
  pub command: Option<String>,
  #[serde(default)]
  pub args: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  pub assert: Option<RawAssertion>,
  pub path: Option<String>,
  pub content: Option<String>,
  #[serde(default)]
  pub executable: bool,
  pub on: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAssertion {
  pub kind: Option<String>,
  pub expected: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawLivecheck {
  pub strategy: Option<String>,
  pub url: Option<String>,
  pub regex: Option<String>,
  #[serde(default)]
  pub pipeline: Vec<serde_json::Value>,
  pub skip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFailsWith {
  pub compiler: Option<String>,
  pub version: Option<u32>,
}

/// Parse and validate one descriptor. `origin` names it in errors (usually
/// the file path).
pub fn parse_descriptor(text: &str, origin: &str) -> Result<Formula, RegistryError> {
  let descriptor: Descriptor = toml::from_str(text).map_err(|e| RegistryError::Parse {
    origin: origin.to_string(),
    message: e.to_string().trim_end().to_string(),
  })?;
  Ok(descriptor.validate(origin)?)
}

struct Checker<'a> {
  formula: &'a str,
  deps: Vec<&'a str>,
  resources: Vec<&'a str>,
}

impl Checker<'_> {
  fn err(&self, field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::new(self.formula, field, message)
  }

  fn required<'v>(&self, value: &'v Option<String>, field: &str) -> Result<&'v str, ValidationError> {
    match value.as_deref().map(str::trim) {
      Some(v) if !v.is_empty() => Ok(v),
      _ => Err(self.err(field, "is required")),
    }
  }

  fn predicate(&self, text: &Option<String>, field: &str) -> Result<Option<Predicate>, ValidationError> {
    text
      .as_deref()
      .map(|t| Predicate::parse(t).map_err(|m| self.err(field, m)))
      .transpose()
  }

  fn placeholders(&self, text: &str, field: &str, in_test: bool) -> Result<(), ValidationError> {
    let found = placeholder::placeholders(text).map_err(|e| self.err(field, e.to_string()))?;
    for p in found {
      match p {
        Placeholder::TestPath if !in_test => return Err(self.err(field, "$${testpath} is only available in test steps")),
        Placeholder::Dep(name) if !self.deps.contains(&name.as_str()) => {
          return Err(self.err(field, format!("'{name}' is not a declared dependency")));
        }
        Placeholder::Resource(_) if in_test => {
          return Err(self.err(field, "$${resource:...} is only available in install steps"));
        }
        Placeholder::Resource(name) if !self.resources.contains(&name.as_str()) => {
          return Err(self.err(field, format!("'{name}' is not a declared resource")));
        }
        _ => {}
      }
    }
    Ok(())
  }

  fn command(
    &self,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    field: &str,
    in_test: bool,
  ) -> Result<(), ValidationError> {
    self.placeholders(command, &format!("{field}.command"), in_test)?;
    for (j, arg) in args.iter().enumerate() {
      self.placeholders(arg, &format!("{field}.args[{j}]"), in_test)?;
    }
    for (key, value) in env {
      if key.is_empty() || key.contains('=') {
        return Err(self.err(format!("{field}.env"), format!("invalid variable name '{key}'")));
      }
      self.placeholders(value, &format!("{field}.env.{key}"), in_test)?;
    }
    Ok(())
  }

  fn checksum(&self, value: &Option<String>, field: &str) -> Result<ContentHash, ValidationError> {
    let checksum = self.required(value, field)?;
    if !is_sha256_hex(checksum) {
      return Err(self.err(field, "must be 64 lowercase hex characters"));
    }
    Ok(ContentHash(checksum.to_string()))
  }

  fn relative_path(&self, value: &Option<String>, field: &str) -> Result<String, ValidationError> {
    let path = self.required(value, field)?;
    if path.starts_with('/') || path.split('/').any(|c| c == "..") {
      return Err(self.err(field, format!("'{path}' must stay inside the prefix")));
    }
    Ok(path.to_string())
  }
}

fn valid_name(name: &str) -> bool {
  name
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    && name
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-+._@".contains(c))
}

/// Resource names become directory names under the build path.
fn valid_resource_name(name: &str) -> bool {
  name != "."
    && name != ".."
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-+._".contains(c))
}

fn is_commit_sha(s: &str) -> bool {
  s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl Descriptor {
  pub fn validate(self, origin: &str) -> Result<Formula, ValidationError> {
    let name = match self.name.as_deref().map(str::trim) {
      Some(n) if !n.is_empty() => n.to_string(),
      _ => return Err(ValidationError::new(origin, "name", "is required")),
    };
    if !valid_name(&name) {
      return Err(ValidationError::new(
        &name,
        "name",
        "must be lowercase letters, digits or one of -+._@",
      ));
    }

    let deps: Vec<&str> = self
      .dependencies
      .iter()
      .filter_map(|d| d.name.as_deref())
      .collect();
    let resource_names: Vec<&str> = self
      .resources
      .iter()
      .filter_map(|r| r.name.as_deref())
      .collect();
    let check = Checker {
      formula: &name,
      deps,
      resources: resource_names,
    };

    let head = self.head.as_ref().map(|h| match h {
      RawHead::Url(url) => HeadRef {
        repository: url.clone(),
        branch: None,
      },
      RawHead::Table { url, branch } => HeadRef {
        repository: url.clone(),
        branch: branch.clone(),
      },
    });
    if let Some(h) = &head
      && h.repository.trim().is_empty()
    {
      return Err(check.err("head", "repository url is required"));
    }

    let source = self.source(&check, head.as_ref())?;

    let mut resources: Vec<Resource> = Vec::with_capacity(self.resources.len());
    for (i, raw) in self.resources.iter().enumerate() {
      let resource = Self::resource(&check, i, raw)?;
      if resources.iter().any(|r| r.name == resource.name) {
        return Err(check.err(format!("resources[{i}].name"), format!("'{}' is declared twice", resource.name)));
      }
      resources.push(resource);
    }

    let version = match (&self.version, &source) {
      (Some(v), _) if v.trim().is_empty() => return Err(check.err("version", "must not be empty")),
      (Some(v), _) => v.trim().to_string(),
      (None, SourceRef::Head { .. }) => HEAD_VERSION.to_string(),
      (None, _) => return Err(check.err("version", "is required")),
    };

    let mut dependencies = Vec::with_capacity(self.dependencies.len());
    for (i, dep) in self.dependencies.iter().enumerate() {
      let field = format!("dependencies[{i}]");
      let dep_name = check.required(&dep.name, &format!("{field}.name"))?.to_string();
      let kind = match dep.kind.as_deref() {
        None => DepKind::Runtime,
        Some(k) => DepKind::parse(k).ok_or_else(|| {
          check.err(
            format!("{field}.kind"),
            format!("unknown kind '{k}', expected build, runtime or test"),
          )
        })?,
      };
      dependencies.push(Dependency {
        name: dep_name,
        kind,
        on: check.predicate(&dep.on, &format!("{field}.on"))?,
      });
    }

    let mut install = Vec::with_capacity(self.install.len());
    for (i, step) in self.install.iter().enumerate() {
      let field = format!("install[{i}]");
      let command = check.required(&step.command, &format!("{field}.command"))?.to_string();
      check.command(&command, &step.args, &step.env, &field, false)?;
      install.push(InstallStep {
        command,
        args: step.args.clone(),
        env: step.env.clone(),
        on: check.predicate(&step.on, &format!("{field}.on"))?,
      });
    }

    let fixups = self
      .fixups
      .iter()
      .enumerate()
      .map(|(i, f)| Self::fixup(&check, i, f))
      .collect::<Result<Vec<_>, _>>()?;

    let tests = self
      .test
      .iter()
      .enumerate()
      .map(|(i, t)| Self::test_step(&check, i, t))
      .collect::<Result<Vec<_>, _>>()?;

    let mut bottle = BTreeMap::new();
    for (tag, digest) in &self.bottle {
      let field = format!("bottle.{tag}");
      let platform: Platform = tag.parse().map_err(|e| check.err(&field, format!("{e}")))?;
      if platform.bottle_tag().as_deref() != Some(tag.as_str()) {
        return Err(check.err(&field, format!("'{tag}' is not a bottle tag")));
      }
      if !is_sha256_hex(digest) {
        return Err(check.err(&field, "must be 64 lowercase hex characters"));
      }
      bottle.insert(tag.clone(), ContentHash(digest.clone()));
    }

    let livecheck = self
      .livecheck
      .as_ref()
      .map(|lc| Self::livecheck(&check, lc, head.is_some()))
      .transpose()?;

    let mut fails_with = Vec::with_capacity(self.fails_with.len());
    for (i, f) in self.fails_with.iter().enumerate() {
      let field = format!("fails_with[{i}].compiler");
      let compiler: CompilerKind = check
        .required(&f.compiler, &field)?
        .parse()
        .map_err(|_| check.err(&field, "unknown compiler, expected clang or gcc"))?;
      fails_with.push(FailsWith {
        compiler,
        version: f.version,
      });
    }

    Ok(Formula {
      name,
      desc: self.desc,
      homepage: self.homepage,
      license: self.license,
      version,
      revision: self.revision,
      source,
      resources,
      head,
      dependencies,
      install,
      fixups,
      tests,
      bottle,
      livecheck,
      fails_with,
      keg_only: self.keg_only,
    })
  }

  fn source(&self, check: &Checker<'_>, head: Option<&HeadRef>) -> Result<SourceRef, ValidationError> {
    match (&self.url, &self.repository) {
      (Some(_), Some(_)) => Err(check.err("repository", "conflicts with url")),
      (Some(_), None) => {
        let url = check.required(&self.url, "url")?.to_string();
        if self.tag.is_some() || self.revision_sha.is_some() {
          return Err(check.err("tag", "only valid together with repository"));
        }
        let checksum = check
          .required(&self.checksum, "checksum")
          .map_err(|_| check.err("checksum", "is required when url is set"))?;
        if !is_sha256_hex(checksum) {
          return Err(check.err("checksum", "must be 64 lowercase hex characters"));
        }
        Ok(SourceRef::Url {
          url,
          mirrors: self.mirrors.clone(),
          checksum: ContentHash(checksum.to_string()),
        })
      }
      (None, Some(_)) => {
        let repository = check.required(&self.repository, "repository")?.to_string();
        if self.checksum.is_some() {
          return Err(check.err("checksum", "only valid together with url"));
        }
        let tag = check.required(&self.tag, "tag")?.to_string();
        if let Some(sha) = &self.revision_sha
          && !is_commit_sha(sha)
        {
          return Err(check.err("revision_sha", "must be a 40 character commit id"));
        }
        self.no_mirrors(check)?;
        Ok(SourceRef::Git {
          repository,
          tag,
          revision: self.revision_sha.as_ref().map(|s| s.to_ascii_lowercase()),
        })
      }
      (None, None) => {
        let Some(head) = head else {
          return Err(check.err("url", "one of url, repository or head is required"));
        };
        if self.checksum.is_some() {
          return Err(check.err("checksum", "only valid together with url"));
        }
        self.no_mirrors(check)?;
        Ok(SourceRef::Head {
          repository: head.repository.clone(),
          branch: head.branch.clone(),
        })
      }
    }
  }

  fn resource(check: &Checker<'_>, i: usize, raw: &RawResource) -> Result<Resource, ValidationError> {
    let field = format!("resources[{i}]");
    let at = |name: &str| format!("{field}.{name}");
    let name = check.required(&raw.name, &at("name"))?;
    if !valid_resource_name(name) {
      return Err(check.err(
        at("name"),
        format!("'{name}' must be letters, digits or one of -+._"),
      ));
    }
    Ok(Resource {
      name: name.to_string(),
      url: check.required(&raw.url, &at("url"))?.to_string(),
      mirrors: raw.mirrors.clone(),
      checksum: check.checksum(&raw.checksum, &at("checksum"))?,
      on: check.predicate(&raw.on, &at("on"))?,
    })
  }

  fn no_mirrors(&self, check: &Checker<'_>) -> Result<(), ValidationError> {
    if self.mirrors.is_empty() {
      Ok(())
    } else {
      Err(check.err("mirrors", "only valid together with url"))
    }
  }

  fn fixup(check: &Checker<'_>, i: usize, f: &RawFixup) -> Result<Fixup, ValidationError> {
    let field = format!("fixups[{i}]");
    let at = |name: &str| format!("{field}.{name}");
    match check.required(&f.kind, &at("kind"))? {
      "symlink" => Ok(Fixup::Symlink {
        target: check.required(&f.target, &at("target"))?.to_string(),
        link: check.relative_path(&f.link, &at("link"))?,
      }),
      "link_all" => Ok(Fixup::LinkAll {
        from: check.relative_path(&f.from, &at("from"))?,
        to: check.relative_path(&f.to, &at("to"))?,
      }),
      "gzip" => Ok(Fixup::Gzip {
        dir: check.relative_path(&f.dir, &at("dir"))?,
        suffix: check.required(&f.suffix, &at("suffix"))?.to_string(),
      }),
      other => Err(check.err(
        at("kind"),
        format!("unknown fixup '{other}', expected symlink, link_all or gzip"),
      )),
    }
  }

  fn test_step(check: &Checker<'_>, i: usize, t: &RawTestStep) -> Result<TestStep, ValidationError> {
    let field = format!("test[{i}]");
    let at = |name: &str| format!("{field}.{name}");
    let kind = match t.kind.as_deref() {
      Some(k) => k,
      None if t.command.is_some() => "run",
      None if t.path.is_some() => "write",
      None => return Err(check.err(at("command"), "is required")),
    };

    let kind = match kind {
      "run" => {
        let command = check.required(&t.command, &at("command"))?.to_string();
        check.command(&command, &t.args, &t.env, &field, true)?;
        TestStepKind::Run {
          command,
          args: t.args.clone(),
          env: t.env.clone(),
          assertion: Self::assertion(check, &field, t.assert.as_ref())?,
        }
      }
      "write" => {
        let content = t.content.clone().unwrap_or_default();
        check.placeholders(&content, &at("content"), true)?;
        TestStepKind::Write {
          path: check.relative_path(&t.path, &at("path"))?,
          content,
          executable: t.executable,
        }
      }
      other => {
        return Err(check.err(at("kind"), format!("unknown test step '{other}', expected run or write")));
      }
    };

    Ok(TestStep {
      kind,
      on: check.predicate(&t.on, &at("on"))?,
    })
  }

  fn assertion(check: &Checker<'_>, field: &str, raw: Option<&RawAssertion>) -> Result<Assertion, ValidationError> {
    let Some(raw) = raw else {
      return Ok(Assertion::default());
    };
    let kind_field = format!("{field}.assert.kind");
    let expected_field = format!("{field}.assert.expected");
    let text = || match &raw.expected {
      Some(serde_json::Value::String(s)) => Ok(s.clone()),
      _ => Err(check.err(&expected_field, "must be a string")),
    };
    match check.required(&raw.kind, &kind_field)? {
      "exact" => Ok(Assertion::Exact(text()?)),
      "contains" => Ok(Assertion::Contains(text()?)),
      "exit_code" => match &raw.expected {
        None => Ok(Assertion::ExitCode(0)),
        Some(value) => value
          .as_i64()
          .and_then(|n| i32::try_from(n).ok())
          .map(Assertion::ExitCode)
          .ok_or_else(|| check.err(&expected_field, "must be an integer exit code")),
      },
      other => Err(check.err(
        kind_field,
        format!("unknown assertion '{other}', expected exact, contains or exit_code"),
      )),
    }
  }

  fn livecheck(check: &Checker<'_>, raw: &RawLivecheck, has_head: bool) -> Result<Livecheck, ValidationError> {
    if let Some(reason) = &raw.skip {
      return Ok(Livecheck::Skip(reason.clone()));
    }

    let strategy_text = check.required(&raw.strategy, "livecheck.strategy")?;
    let strategy = LivecheckStrategy::parse(strategy_text).ok_or_else(|| {
      check.err(
        "livecheck.strategy",
        format!("unknown strategy '{strategy_text}', expected regex, git, json or xml"),
      )
    })?;

    let source = match raw.url.as_deref() {
      None | Some("stable") => LivecheckSource::Stable,
      Some("head") if has_head => LivecheckSource::Head,
      Some("head") => return Err(check.err("livecheck.url", "formula declares no head")),
      Some(url) if url.trim().is_empty() => return Err(check.err("livecheck.url", "must not be empty")),
      Some(url) => LivecheckSource::Url(url.to_string()),
    };

    if let Some(pattern) = &raw.regex {
      regex::Regex::new(pattern).map_err(|e| check.err("livecheck.regex", e.to_string()))?;
    } else if strategy == LivecheckStrategy::Regex {
      return Err(check.err("livecheck.regex", "is required for the regex strategy"));
    }

    let structured = matches!(strategy, LivecheckStrategy::Json | LivecheckStrategy::Xml);
    if !structured && !raw.pipeline.is_empty() {
      return Err(check.err("livecheck.pipeline", "only valid for json and xml strategies"));
    }
    let pipeline = raw
      .pipeline
      .iter()
      .enumerate()
      .map(|(i, value)| {
        serde_json::from_value::<Op>(value.clone()).map_err(|e| check.err(format!("livecheck.pipeline[{i}]"), e.to_string()))
      })
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Livecheck::Check(LivecheckSpec {
      strategy,
      source,
      regex: raw.regex.clone(),
      pipeline,
    }))
  }
}
