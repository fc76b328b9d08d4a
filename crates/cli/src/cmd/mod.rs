mod build;
mod gc;
mod info;
mod livecheck;

pub use build::{BuildArgs, cmd_build};
pub use gc::cmd_gc;
pub use info::cmd_info;
pub use livecheck::cmd_livecheck;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use cellar_lib::formula::{ChecksumLedger, FormulaRegistry};
use cellar_lib::platform::Platform;
use cellar_lib::platform::paths::CellarPaths;

/// Load every descriptor in `formula_dir`, checked against the cellar's
/// checksum ledger.
fn load_registry(formula_dir: &Path, paths: &CellarPaths) -> Result<FormulaRegistry> {
  let ledger = ChecksumLedger::load(&paths.checksums_file()).context("Failed to load checksum ledger")?;
  let mut registry = FormulaRegistry::new().with_ledger(ledger);
  let count = registry
    .add_dir(formula_dir)
    .with_context(|| format!("Failed to load formulas from {}", formula_dir.display()))?;
  debug!(count, dir = %formula_dir.display(), "formulas loaded");
  Ok(registry)
}

/// The `--platform` argument, or the host platform.
fn target_platform(arg: Option<&str>) -> Result<Platform> {
  match arg {
    Some(text) => text
      .parse::<Platform>()
      .with_context(|| format!("Invalid platform '{text}'")),
    None => Platform::current().context("Unsupported host platform; pass --platform"),
  }
}
