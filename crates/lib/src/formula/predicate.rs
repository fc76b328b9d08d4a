//! Platform predicates attached to dependencies and steps.
//!
//! Grammar: `term ("&&" term)*` where `term = "!"? atom` and atom is one of
//! `on_macos`, `on_linux`, `on_arm`, `on_intel`, `on_<release>`,
//! `on_<release>_or_newer`, `on_<release>_or_older` or `compiler_fails`.

use std::fmt;

use crate::platform::{Arch, MacOsRelease, Os, Platform};

use super::types::FailsWith;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseBound {
  Exact,
  OrNewer,
  OrOlder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Atom {
  Os(Os),
  Arch(Arch),
  Release(MacOsRelease, ReleaseBound),
  CompilerFails,
}

impl Atom {
  fn parse(s: &str) -> Result<Self, String> {
    if s == "compiler_fails" {
      return Ok(Self::CompilerFails);
    }
    let Some(name) = s.strip_prefix("on_") else {
      return Err(format!("unknown predicate '{s}'"));
    };
    match name {
      "macos" => return Ok(Self::Os(Os::MacOs)),
      "linux" => return Ok(Self::Os(Os::Linux)),
      "arm" => return Ok(Self::Arch(Arch::Aarch64)),
      "intel" => return Ok(Self::Arch(Arch::X86_64)),
      _ => {}
    }
    let (codename, bound) = if let Some(c) = name.strip_suffix("_or_newer") {
      (c, ReleaseBound::OrNewer)
    } else if let Some(c) = name.strip_suffix("_or_older") {
      (c, ReleaseBound::OrOlder)
    } else {
      (name, ReleaseBound::Exact)
    };
    MacOsRelease::from_codename(codename)
      .map(|release| Self::Release(release, bound))
      .ok_or_else(|| format!("unknown predicate '{s}'"))
  }

  fn evaluate(&self, platform: &Platform, fails_with: &[FailsWith]) -> bool {
    match *self {
      Self::Os(os) => platform.os == os,
      Self::Arch(arch) => platform.arch == arch,
      Self::Release(release, bound) => {
        let Some(current) = platform.macos.filter(|_| platform.os == Os::MacOs) else {
          return false;
        };
        match bound {
          ReleaseBound::Exact => current == release,
          ReleaseBound::OrNewer => current >= release,
          ReleaseBound::OrOlder => current <= release,
        }
      }
      Self::CompilerFails => platform
        .compiler
        .is_some_and(|compiler| fails_with.iter().any(|f| f.matches(&compiler))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Term {
  negated: bool,
  atom: Atom,
}

/// A parsed conjunction of (possibly negated) platform atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
  text: String,
  terms: Vec<Term>,
}

impl Predicate {
  pub fn parse(text: &str) -> Result<Self, String> {
    let mut terms = Vec::new();
    for raw in text.split("&&") {
      let raw = raw.trim();
      if raw.is_empty() {
        return Err(format!("empty term in '{text}'"));
      }
      let (negated, atom) = match raw.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, raw),
      };
      terms.push(Term {
        negated,
        atom: Atom::parse(atom)?,
      });
    }
    Ok(Self {
      text: text.trim().to_string(),
      terms,
    })
  }

  /// True when every term holds on `platform`.
  pub fn evaluate(&self, platform: &Platform, fails_with: &[FailsWith]) -> bool {
    self
      .terms
      .iter()
      .all(|term| term.atom.evaluate(platform, fails_with) != term.negated)
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }
}

impl fmt::Display for Predicate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}
