use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A descriptor that parsed but violates a formula rule.
///
/// `field` is a path into the descriptor such as `dependencies[1].kind` or
/// `install[0].args[2]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{formula}: invalid {field}: {message}")]
pub struct ValidationError {
  pub formula: String,
  pub field: String,
  pub message: String,
}

impl ValidationError {
  pub fn new(formula: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      formula: formula.into(),
      field: field.into(),
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {origin}: {message}")]
  Parse { origin: String, message: String },

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("checksum ledger {path}: {message}")]
  Ledger { path: PathBuf, message: String },
}
