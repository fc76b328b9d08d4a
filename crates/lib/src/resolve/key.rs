//! Build keys and the rebuild decision.

use crate::cache::{ArtifactCache, BuildKey, BuildRecord, CacheError};
use crate::formula::FormulaView;
use crate::platform::Platform;
use crate::util::hash::{ContentHash, HashError, Hashable, hash_bytes};

/// Digest over the records of a node's direct build/runtime dependencies.
///
/// Each entry folds in the dependency's own closure digest, so a change
/// anywhere below propagates to every dependent.
pub fn closure_digest(upstream: &[&BuildRecord]) -> ContentHash {
  let mut entries: Vec<String> = upstream
    .iter()
    .map(|r| {
      format!(
        "{}\t{}\t{}\t{}",
        r.key.name, r.key.pkg_version, r.artifact_digest, r.key.closure_digest
      )
    })
    .collect();
  entries.sort();
  entries.dedup();
  hash_bytes(entries.join("\n").as_bytes())
}

/// Key identifying the build of `view` on `platform` against `upstream`.
pub fn build_key(view: &FormulaView, platform: &Platform, upstream: &[&BuildRecord]) -> Result<BuildKey, HashError> {
  Ok(BuildKey {
    name: view.name.clone(),
    pkg_version: view.pkg_version(),
    platform: platform.to_string(),
    formula_hash: view.compute_content_hash()?,
    closure_digest: closure_digest(upstream),
  })
}

/// True unless the cache holds a record for exactly this build key.
pub fn rebuild_needed(
  view: &FormulaView,
  platform: &Platform,
  upstream: &[&BuildRecord],
  cache: &ArtifactCache,
) -> Result<bool, CacheError> {
  let key = build_key(view, platform, upstream)?;
  Ok(cache.record(&key)?.is_none())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ArtifactOrigin, RecordStatus};
  use crate::formula::{FormulaRegistry, resolve_platform_view};
  use crate::platform::paths::CellarPaths;
  use crate::platform::{Arch, Os};
  use std::fs;
  use tempfile::TempDir;

  const SUM: &str = "9a93b2b7dfdac77ceba5a558a580e74667dd6fede4585b91eefb60f03b72df23";

  fn view(revision: u32) -> FormulaView {
    let text = format!(
      "name = \"app\"\nversion = \"2.1\"\nrevision = {revision}\nurl = \"https://example.com/app.tgz\"\nchecksum = \"{SUM}\"\n"
    );
    let mut registry = FormulaRegistry::new();
    let formula = registry.insert_text(&text, "app.toml").unwrap();
    resolve_platform_view(formula, &linux())
  }

  fn linux() -> Platform {
    Platform::new(Arch::X86_64, Os::Linux)
  }

  fn record(name: &str, digest: char, closure: char) -> BuildRecord {
    BuildRecord {
      key: BuildKey {
        name: name.to_string(),
        pkg_version: "1.0".to_string(),
        platform: "x86_64-linux".to_string(),
        formula_hash: ContentHash("f".repeat(64)),
        closure_digest: ContentHash(closure.to_string().repeat(64)),
      },
      artifact_digest: ContentHash(digest.to_string().repeat(64)),
      origin: ArtifactOrigin::Source,
      log_path: None,
      status: RecordStatus::Built,
      created_at: 0,
    }
  }

  #[test]
  fn closure_digest_ignores_order() {
    let a = record("a", '1', '0');
    let b = record("b", '2', '0');
    assert_eq!(closure_digest(&[&a, &b]), closure_digest(&[&b, &a]));
  }

  #[test]
  fn closure_digest_is_transitive() {
    let direct = record("lib", '1', '0');
    let changed_below = record("lib", '1', '9');
    assert_ne!(closure_digest(&[&direct]), closure_digest(&[&changed_below]));
  }

  #[test]
  fn key_tracks_revision_and_dependencies() {
    let dep = record("lib", '1', '0');
    let rebuilt_dep = record("lib", '2', '0');

    let base = build_key(&view(0), &linux(), &[&dep]).unwrap();
    assert_eq!(base, build_key(&view(0), &linux(), &[&dep]).unwrap());
    assert_eq!(base.pkg_version, "2.1");

    let revised = build_key(&view(1), &linux(), &[&dep]).unwrap();
    assert_eq!(revised.pkg_version, "2.1_1");
    assert_ne!(base.formula_hash, revised.formula_hash);

    let other_dep = build_key(&view(0), &linux(), &[&rebuilt_dep]).unwrap();
    assert_ne!(base.closure_digest, other_dep.closure_digest);

    let arm = Platform::new(Arch::Aarch64, Os::Linux);
    assert_ne!(base, build_key(&view(0), &arm, &[&dep]).unwrap());
  }

  #[test]
  fn rebuild_needed_until_stored() {
    let temp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(&CellarPaths::new(temp.path()));
    let dep = record("lib", '1', '0');
    let v = view(0);

    assert!(rebuild_needed(&v, &linux(), &[&dep], &cache).unwrap());

    let tree = temp.path().join("tree");
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("f"), "x").unwrap();
    let key = build_key(&v, &linux(), &[&dep]).unwrap();
    cache.store(&key, &tree, None, ArtifactOrigin::Source).unwrap();

    assert!(!rebuild_needed(&v, &linux(), &[&dep], &cache).unwrap());
    let changed = record("lib", '3', '0');
    assert!(rebuild_needed(&v, &linux(), &[&changed], &cache).unwrap());
  }
}
