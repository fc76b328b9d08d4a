//! Checksum ledger: the first verified checksum for a (name, version) sticks.
//!
//! Entries are only written once a download has matched the declared
//! checksum, so a mistyped checksum that never verified can still be fixed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::fs::write_json_atomic;

use super::error::{RegistryError, ValidationError};
use super::types::{Formula, SourceRef};

const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
  version: u32,
  checksums: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ChecksumLedger {
  path: PathBuf,
  entries: BTreeMap<String, String>,
  dirty: bool,
}

impl ChecksumLedger {
  /// Load the ledger at `path`; a missing file is an empty ledger.
  pub fn load(path: &Path) -> Result<Self, RegistryError> {
    let ledger_err = |message: String| RegistryError::Ledger {
      path: path.to_path_buf(),
      message,
    };
    let entries = match std::fs::read_to_string(path) {
      Ok(text) => {
        let file: LedgerFile = serde_json::from_str(&text).map_err(|e| ledger_err(e.to_string()))?;
        if file.version != LEDGER_VERSION {
          return Err(ledger_err(format!("unsupported ledger version {}", file.version)));
        }
        file.checksums
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
      Err(e) => return Err(ledger_err(e.to_string())),
    };
    Ok(Self {
      path: path.to_path_buf(),
      entries,
      dirty: false,
    })
  }

  /// Verify `formula` against the recorded checksum for its version.
  /// Versions without an entry pass.
  pub fn check(&self, formula: &Formula) -> Result<(), ValidationError> {
    let SourceRef::Url { checksum, .. } = &formula.source else {
      return Ok(());
    };
    match self.entries.get(&entry_key(formula)) {
      Some(recorded) if recorded != &checksum.0 => Err(ValidationError::new(
        &formula.name,
        "checksum",
        format!(
          "version {} was first verified with checksum {recorded}; checksums are immutable per version",
          formula.version
        ),
      )),
      _ => Ok(()),
    }
  }

  /// Remember the checksum of `formula` after its source verified.
  ///
  /// # Returns
  ///
  /// Whether a new entry was added.
  pub fn record(&mut self, formula: &Formula) -> bool {
    let SourceRef::Url { checksum, .. } = &formula.source else {
      return false;
    };
    let key = entry_key(formula);
    if self.entries.contains_key(&key) {
      return false;
    }
    debug!(formula = %formula.name, version = %formula.version, "recording checksum");
    self.entries.insert(key, checksum.0.clone());
    self.dirty = true;
    true
  }

  /// Persist new entries, if any.
  pub fn save(&mut self) -> Result<(), RegistryError> {
    if !self.dirty {
      return Ok(());
    }
    let file = LedgerFile {
      version: LEDGER_VERSION,
      checksums: self.entries.clone(),
    };
    write_json_atomic(&self.path, &file).map_err(|e| RegistryError::Ledger {
      path: self.path.clone(),
      message: e.to_string(),
    })?;
    self.dirty = false;
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

fn entry_key(formula: &Formula) -> String {
  format!("{}@{}", formula.name, formula.version)
}
