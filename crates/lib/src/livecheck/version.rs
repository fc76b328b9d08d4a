//! Lenient version ordering for upstream candidates.
//!
//! Upstream version strings are rarely strict semver: `1.3.1`, `v2.0`,
//! `3.4.5-rc1`, `1.1.1w`, `2024.01.15`. A [`Version`] keeps the numeric
//! release components (compared with zero padding, so `1.0 == 1.0.0`), an
//! optional post-release letter and a [`semver::Prerelease`] that sorts below
//! the plain release.

use std::cmp::Ordering;
use std::fmt;

use semver::Prerelease;

/// Words that mark a suffix as a pre-release.
const PRERELEASE_WORDS: &[&str] = &["alpha", "beta", "rc", "pre", "preview", "dev", "a", "b"];

#[derive(Debug, Clone)]
pub struct Version {
  raw: String,
  release: Vec<u64>,
  /// `1.1.1w` style letter, sorted after the bare release.
  letter: Option<char>,
  pre: Prerelease,
}

impl Version {
  /// Parse the first version-looking run in `s`.
  ///
  /// Returns `None` when `s` holds no digits.
  pub fn parse(s: &str) -> Option<Self> {
    let trimmed = s.trim();
    let start = trimmed.find(|c: char| c.is_ascii_digit())?;
    let body = &trimmed[start..];

    let release_end = body
      .char_indices()
      .find(|&(i, c)| {
        !(c.is_ascii_digit() || (c == '.' && body[i + 1..].starts_with(|n: char| n.is_ascii_digit())))
      })
      .map_or(body.len(), |(i, _)| i);
    let release: Vec<u64> = body[..release_end]
      .split('.')
      .map(|part| part.parse().ok())
      .collect::<Option<_>>()?;

    let suffix = &body[release_end..];
    let (letter, pre) = parse_suffix(suffix);

    Some(Self {
      raw: trimmed.to_string(),
      release,
      letter,
      pre,
    })
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn is_prerelease(&self) -> bool {
    !self.pre.is_empty()
  }

  fn component(&self, i: usize) -> u64 {
    self.release.get(i).copied().unwrap_or(0)
  }
}

fn parse_suffix(suffix: &str) -> (Option<char>, Prerelease) {
  let mut chars = suffix.chars();
  if let (Some(c), None) = (chars.next(), chars.next())
    && c.is_ascii_lowercase()
    && c != 'a'
    && c != 'b'
  {
    return (Some(c), Prerelease::EMPTY);
  }

  let cleaned: String = suffix
    .trim_start_matches(['-', '.', '_', '+'])
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '.' })
    .collect();
  let cleaned = cleaned.trim_matches('.');
  if cleaned.is_empty() {
    return (None, Prerelease::EMPTY);
  }

  let word: String = cleaned.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
  if !PRERELEASE_WORDS.contains(&word.as_str()) {
    // Build metadata or a platform tag, not a pre-release.
    return (None, Prerelease::EMPTY);
  }

  // `rc1` -> `rc.1` so numeric parts compare numerically.
  let spaced = format!("{word}.{}", cleaned[word.len()..].trim_start_matches('.'));
  let spaced = spaced.trim_end_matches('.');
  let pre = Prerelease::new(spaced)
    .or_else(|_| Prerelease::new(&word))
    .unwrap_or(Prerelease::EMPTY);
  (None, pre)
}

impl Ord for Version {
  fn cmp(&self, other: &Self) -> Ordering {
    let len = self.release.len().max(other.release.len());
    for i in 0..len {
      match self.component(i).cmp(&other.component(i)) {
        Ordering::Equal => {}
        unequal => return unequal,
      }
    }
    match self.letter.cmp(&other.letter) {
      Ordering::Equal => {}
      unequal => return unequal,
    }
    match (self.pre.is_empty(), other.pre.is_empty()) {
      (true, true) => Ordering::Equal,
      (true, false) => Ordering::Greater,
      (false, true) => Ordering::Less,
      (false, false) => self.pre.cmp(&other.pre),
    }
  }
}

impl PartialOrd for Version {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl PartialEq for Version {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Version {}

impl fmt::Display for Version {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

/// The greatest parseable candidate.
pub fn latest<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Option<Version> {
  candidates.into_iter().filter_map(Version::parse).max()
}
