use std::fmt;
use std::str::FromStr;

use super::PlatformParseError;

/// Operating system families a formula can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
  Linux,
  MacOs,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Os {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" => Ok(Self::MacOs),
      other => Err(PlatformParseError::UnknownOs(other.to_string())),
    }
  }
}

/// macOS releases, ordered oldest first so `>=` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MacOsRelease {
  Catalina,
  BigSur,
  Monterey,
  Ventura,
  Sonoma,
  Sequoia,
}

impl MacOsRelease {
  pub const ALL: [MacOsRelease; 6] = [
    Self::Catalina,
    Self::BigSur,
    Self::Monterey,
    Self::Ventura,
    Self::Sonoma,
    Self::Sequoia,
  ];

  /// Codename as used in bottle tags and predicates (`big_sur`, `sonoma`).
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Catalina => "catalina",
      Self::BigSur => "big_sur",
      Self::Monterey => "monterey",
      Self::Ventura => "ventura",
      Self::Sonoma => "sonoma",
      Self::Sequoia => "sequoia",
    }
  }

  pub fn from_codename(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|r| r.as_str() == name)
  }
}

impl fmt::Display for MacOsRelease {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
