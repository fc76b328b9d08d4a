use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::platform::Platform;

use super::descriptor::parse_descriptor;
use super::error::{RegistryError, ValidationError};
use super::ledger::ChecksumLedger;
use super::types::Formula;
use super::view::{FormulaView, resolve_platform_view};

/// Validated formulas, in the order they were added.
#[derive(Debug, Default)]
pub struct FormulaRegistry {
  formulas: Vec<Formula>,
  index: HashMap<String, usize>,
  ledger: Option<ChecksumLedger>,
}

impl FormulaRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Check every url checksum against `ledger` as formulas are added.
  /// Nothing is recorded until [`record_verified`](Self::record_verified).
  pub fn with_ledger(mut self, ledger: ChecksumLedger) -> Self {
    self.ledger = Some(ledger);
    self
  }

  /// Load every `*.toml` below `dir`.
  pub fn load_dir(dir: &Path) -> Result<Self, RegistryError> {
    let mut registry = Self::new();
    registry.add_dir(dir)?;
    Ok(registry)
  }

  /// Add every `*.toml` below `dir`, in sorted path order.
  ///
  /// Nested layouts such as `Formula/z/zlib.toml` are supported.
  ///
  /// # Returns
  ///
  /// The number of formulas added.
  pub fn add_dir(&mut self, dir: &Path) -> Result<usize, RegistryError> {
    let mut added = 0;
    for entry in WalkDir::new(dir).sort_by_file_name() {
      let entry = entry.map_err(|e| RegistryError::Io {
        path: e.path().unwrap_or(dir).to_path_buf(),
        source: e.into_io_error().unwrap_or_else(|| std::io::Error::other("filesystem loop")),
      })?;
      let path = entry.path();
      if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
        continue;
      }
      let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
      })?;
      self.insert_text(&text, &path.display().to_string())?;
      added += 1;
    }
    info!(dir = %dir.display(), formulas = added, "loaded formulas");
    Ok(added)
  }

  /// Parse, validate and add one descriptor.
  pub fn insert_text(&mut self, text: &str, origin: &str) -> Result<&Formula, RegistryError> {
    let formula = parse_descriptor(text, origin)?;
    self.insert(formula)
  }

  /// Add a validated formula, enforcing unique names and the checksum ledger.
  pub fn insert(&mut self, formula: Formula) -> Result<&Formula, RegistryError> {
    if self.index.contains_key(&formula.name) {
      return Err(ValidationError::new(&formula.name, "name", "is already defined").into());
    }
    if let Some(ledger) = self.ledger.as_ref() {
      ledger.check(&formula)?;
    }
    debug!(formula = %formula.name, version = %formula.pkg_version(), "registered formula");
    let idx = self.formulas.len();
    self.index.insert(formula.name.clone(), idx);
    self.formulas.push(formula);
    Ok(&self.formulas[idx])
  }

  pub fn get(&self, name: &str) -> Option<&Formula> {
    self.index.get(name).map(|&i| &self.formulas[i])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  /// Declaration index of `name`.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.index.get(name).copied()
  }

  pub fn formulas(&self) -> &[Formula] {
    &self.formulas
  }

  pub fn len(&self) -> usize {
    self.formulas.len()
  }

  pub fn is_empty(&self) -> bool {
    self.formulas.is_empty()
  }

  /// Platform view of the named formula.
  pub fn view(&self, name: &str, platform: &Platform) -> Option<FormulaView> {
    self.get(name).map(|f| resolve_platform_view(f, platform))
  }

  /// Pin the declared checksum of `name` once its download has verified.
  ///
  /// # Returns
  ///
  /// Whether the ledger gained an entry.
  pub fn record_verified(&mut self, name: &str) -> bool {
    let (Some(ledger), Some(&idx)) = (self.ledger.as_mut(), self.index.get(name)) else {
      return false;
    };
    ledger.record(&self.formulas[idx])
  }

  /// Persist checksums recorded during this session.
  pub fn save_ledger(&mut self) -> Result<(), RegistryError> {
    match self.ledger.as_mut() {
      Some(ledger) => ledger.save(),
      None => Ok(()),
    }
  }
}
