//! Target platform description.
//!
//! A [`Platform`] is what platform predicates in formulas are evaluated
//! against and what bottle tags are derived from. It can be written either as
//! a triple (`aarch64-darwin-sonoma`, `x86_64-linux`) or as a bottle tag
//! (`arm64_sonoma`, `sonoma`, `x86_64_linux`), optionally followed by the
//! host compiler (`@clang-1500`, `@gcc-11`).

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

pub use arch::Arch;
pub use os::{MacOsRelease, Os};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlatformParseError {
  #[error("unknown operating system '{0}'")]
  UnknownOs(String),
  #[error("unknown architecture '{0}'")]
  UnknownArch(String),
  #[error("unknown macOS release '{0}'")]
  UnknownRelease(String),
  #[error("invalid compiler '{0}', expected <clang|gcc>-<version>")]
  InvalidCompiler(String),
  #[error("invalid platform '{0}'")]
  Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerKind {
  Clang,
  Gcc,
}

impl CompilerKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Clang => "clang",
      Self::Gcc => "gcc",
    }
  }
}

impl FromStr for CompilerKind {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "clang" => Ok(Self::Clang),
      "gcc" => Ok(Self::Gcc),
      other => Err(PlatformParseError::InvalidCompiler(other.to_string())),
    }
  }
}

/// Host compiler: clang is identified by its build number, gcc by major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Compiler {
  pub kind: CompilerKind,
  pub version: u32,
}

impl fmt::Display for Compiler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.kind.as_str(), self.version)
  }
}

impl FromStr for Compiler {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || PlatformParseError::InvalidCompiler(s.to_string());
    let (kind, version) = s.split_once('-').ok_or_else(invalid)?;
    Ok(Self {
      kind: kind.parse().map_err(|_| invalid())?,
      version: version.parse().map_err(|_| invalid())?,
    })
  }
}

/// Platform a plan is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
  /// Only meaningful on macOS.
  pub macos: Option<MacOsRelease>,
  pub compiler: Option<Compiler>,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(arch: Arch, os: Os) -> Self {
    Self {
      arch,
      os,
      macos: None,
      compiler: None,
    }
  }

  pub fn with_release(mut self, release: MacOsRelease) -> Self {
    self.macos = Some(release);
    self
  }

  pub fn with_compiler(mut self, compiler: Compiler) -> Self {
    self.compiler = Some(compiler);
    self
  }

  /// Detect the current platform at runtime
  ///
  /// The macOS release is not probed; pass an explicit platform to target
  /// release-specific predicates or bottles.
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self::new(Arch::current()?, Os::current()?))
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin-sonoma")
  pub fn triple(&self) -> String {
    match self.macos {
      Some(release) if self.os == Os::MacOs => format!("{}-{}-{}", self.arch, self.os, release),
      _ => format!("{}-{}", self.arch, self.os),
    }
  }

  /// Bottle tag for this platform, or `None` for macOS without a known release.
  pub fn bottle_tag(&self) -> Option<String> {
    match (self.os, self.macos, self.arch) {
      (Os::Linux, _, arch) => Some(format!("{}_linux", arch.bottle_name())),
      (Os::MacOs, Some(release), Arch::X86_64) => Some(release.as_str().to_string()),
      (Os::MacOs, Some(release), Arch::Aarch64) => Some(format!("arm64_{release}")),
      (Os::MacOs, None, _) => None,
    }
  }

  fn parse_triple(s: &str) -> Result<Self, PlatformParseError> {
    let mut parts = s.splitn(3, '-');
    let (Some(arch), Some(os)) = (parts.next(), parts.next()) else {
      return Err(PlatformParseError::Invalid(s.to_string()));
    };
    let mut platform = Platform::new(arch.parse()?, os.parse()?);
    if let Some(release) = parts.next() {
      if platform.os != Os::MacOs {
        return Err(PlatformParseError::Invalid(s.to_string()));
      }
      platform.macos = Some(parse_release(release)?);
    }
    Ok(platform)
  }

  fn parse_bottle_tag(s: &str) -> Result<Self, PlatformParseError> {
    if let Some(arch) = s.strip_suffix("_linux") {
      return Ok(Platform::new(arch.parse()?, Os::Linux));
    }
    if let Some(release) = s.strip_prefix("arm64_") {
      return Ok(Platform::new(Arch::Aarch64, Os::MacOs).with_release(parse_release(release)?));
    }
    Ok(Platform::new(Arch::X86_64, Os::MacOs).with_release(parse_release(s)?))
  }
}

fn parse_release(s: &str) -> Result<MacOsRelease, PlatformParseError> {
  MacOsRelease::from_codename(s).ok_or_else(|| PlatformParseError::UnknownRelease(s.to_string()))
}

impl FromStr for Platform {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (base, compiler) = match s.split_once('@') {
      Some((base, compiler)) => (base, Some(compiler.parse::<Compiler>()?)),
      None => (s, None),
    };
    let mut platform = if base.contains('-') {
      Self::parse_triple(base)?
    } else {
      Self::parse_bottle_tag(base)?
    };
    platform.compiler = compiler;
    Ok(platform)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())?;
    if let Some(compiler) = self.compiler {
      write!(f, "@{compiler}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn platform_triple_format() {
    let platform = Platform::new(Arch::Aarch64, Os::MacOs);
    assert_eq!(platform.triple(), "aarch64-darwin");

    let platform = Platform::new(Arch::X86_64, Os::Linux);
    assert_eq!(platform.triple(), "x86_64-linux");

    let platform = Platform::new(Arch::Aarch64, Os::MacOs).with_release(MacOsRelease::Sonoma);
    assert_eq!(platform.triple(), "aarch64-darwin-sonoma");
  }

  mod parsing {
    use super::*;

    #[test]
    fn parses_bottle_tags() {
      let p: Platform = "arm64_sonoma".parse().unwrap();
      assert_eq!(p, Platform::new(Arch::Aarch64, Os::MacOs).with_release(MacOsRelease::Sonoma));

      let p: Platform = "big_sur".parse().unwrap();
      assert_eq!(p, Platform::new(Arch::X86_64, Os::MacOs).with_release(MacOsRelease::BigSur));

      let p: Platform = "x86_64_linux".parse().unwrap();
      assert_eq!(p, Platform::new(Arch::X86_64, Os::Linux));
    }

    #[test]
    fn parses_triples_with_compiler() {
      let p: Platform = "x86_64-darwin-catalina@clang-1100".parse().unwrap();
      assert_eq!(p.macos, Some(MacOsRelease::Catalina));
      assert_eq!(
        p.compiler,
        Some(Compiler {
          kind: CompilerKind::Clang,
          version: 1100
        })
      );
      assert_eq!(p.to_string(), "x86_64-darwin-catalina@clang-1100");
    }

    #[test]
    fn rejects_release_on_linux() {
      assert!("x86_64-linux-sonoma".parse::<Platform>().is_err());
    }

    #[test]
    fn rejects_unknown_parts() {
      assert_eq!(
        "mips-linux".parse::<Platform>(),
        Err(PlatformParseError::UnknownArch("mips".to_string()))
      );
      assert_eq!(
        "arm64_mojave".parse::<Platform>(),
        Err(PlatformParseError::UnknownRelease("mojave".to_string()))
      );
      assert!("x86_64-linux@icc-1".parse::<Platform>().is_err());
    }
  }

  mod bottle_tags {
    use super::*;

    #[test]
    fn tag_round_trips_through_parse() {
      for tag in ["arm64_sequoia", "ventura", "arm64_linux", "x86_64_linux"] {
        let platform: Platform = tag.parse().unwrap();
        assert_eq!(platform.bottle_tag().as_deref(), Some(tag));
      }
    }

    #[test]
    fn macos_without_release_has_no_tag() {
      assert_eq!(Platform::new(Arch::Aarch64, Os::MacOs).bottle_tag(), None);
    }
  }
}
