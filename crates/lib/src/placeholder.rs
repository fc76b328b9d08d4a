//! `$${...}` placeholders in step commands, arguments, env values and file
//! contents.
//!
//! # Placeholder Formats
//!
//! - `$${prefix}` - the install prefix of the formula being built
//! - `$${prefix:<sub>}` - a path below the prefix (`$${prefix:bin}`)
//! - `$${buildpath}` - the unpacked source directory
//! - `$${testpath}` - the ephemeral test directory (test steps only)
//! - `$${version}` - the declared version
//! - `$${name}` - the formula name
//! - `$${dep:<name>}` - the installed prefix of a dependency
//! - `$${resource:<name>}` - the staged directory of a resource (install steps only)
//!
//! Single `$` characters pass through unchanged so shell variables like
//! `$HOME` keep working. `$$${` produces a literal `$${`.
//!
//! # Example
//!
//! ```
//! use cellar_lib::placeholder::{parse, Placeholder, Segment};
//!
//! let segments = parse("$${prefix:bin}/tool --home=$HOME").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Prefix(Some("bin".to_string()))),
//!     Segment::Literal("/tool --home=$HOME".to_string()),
//! ]);
//! ```

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Prefix(Option<String>),
  BuildPath,
  TestPath,
  Version,
  Name,
  Dep(String),
  Resource(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder '{0}'")]
  Unknown(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("placeholder '{0}' is not available here")]
  Unavailable(String),

  #[error("'{0}' is not a dependency")]
  UnknownDependency(String),

  #[error("'{0}' is not a staged resource")]
  UnknownResource(String),
}

/// Supplies values for placeholders at execution time.
pub trait Resolver {
  fn resolve(&self, placeholder: &Placeholder) -> Result<String, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error for unclosed, empty or unknown placeholders.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;
  let mut offset = 0;

  while let Some(found) = rest.find("$${") {
    let escaped = found > 0 && rest.as_bytes()[found - 1] == b'$';
    if escaped {
      literal.push_str(&rest[..found - 1]);
      literal.push_str("$${");
      offset += found + 3;
      rest = &rest[found + 3..];
      continue;
    }

    literal.push_str(&rest[..found]);
    let body_start = found + 3;
    let Some(close) = rest[body_start..].find('}') else {
      return Err(PlaceholderError::Unclosed(offset + found));
    };

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }
    segments.push(Segment::Placeholder(parse_body(&rest[body_start..body_start + close])?));

    let consumed = body_start + close + 1;
    offset += consumed;
    rest = &rest[consumed..];
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }
  Ok(segments)
}

fn parse_body(body: &str) -> Result<Placeholder, PlaceholderError> {
  let (kind, arg) = match body.split_once(':') {
    Some((kind, arg)) => (kind, Some(arg)),
    None => (body, None),
  };

  let nonempty = |arg: &str| {
    if arg.is_empty() {
      Err(PlaceholderError::Malformed(format!("empty argument in '{body}'")))
    } else {
      Ok(arg.to_string())
    }
  };

  match (kind, arg) {
    ("prefix", None) => Ok(Placeholder::Prefix(None)),
    ("prefix", Some(sub)) => Ok(Placeholder::Prefix(Some(nonempty(sub)?))),
    ("buildpath", None) => Ok(Placeholder::BuildPath),
    ("testpath", None) => Ok(Placeholder::TestPath),
    ("version", None) => Ok(Placeholder::Version),
    ("name", None) => Ok(Placeholder::Name),
    ("dep", Some(name)) => Ok(Placeholder::Dep(nonempty(name)?)),
    ("dep", None) => Err(PlaceholderError::Malformed("dep placeholder needs a name".to_string())),
    ("resource", Some(name)) => Ok(Placeholder::Resource(nonempty(name)?)),
    ("resource", None) => Err(PlaceholderError::Malformed("resource placeholder needs a name".to_string())),
    ("", _) => Err(PlaceholderError::Malformed("empty placeholder".to_string())),
    _ => Err(PlaceholderError::Unknown(body.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut out = String::with_capacity(input.len());
  for segment in parse(input)? {
    match segment {
      Segment::Literal(text) => out.push_str(&text),
      Segment::Placeholder(p) => out.push_str(&resolver.resolve(&p)?),
    }
  }
  Ok(out)
}

/// All placeholders referenced by `input`, in order of appearance.
pub fn placeholders(input: &str) -> Result<Vec<Placeholder>, PlaceholderError> {
  Ok(
    parse(input)?
      .into_iter()
      .filter_map(|s| match s {
        Segment::Placeholder(p) => Some(p),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}
