//! Pruning of superseded build records and unreferenced objects.
//!
//! The newest record of every (name, platform) pair is always kept. Older
//! records go once they pass the age limit, together with their logs. Objects
//! no remaining record points at are removed afterwards, and so are working
//! directories left in `tmp/` by interrupted runs.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::{ArtifactCache, BuildRecord, CacheError};
use crate::platform::paths::CellarPaths;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum GcError {
  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct GcOptions {
  /// Report what would be removed without removing it.
  pub dry_run: bool,
  /// Superseded records younger than this survive.
  pub keep_days: u64,
}

impl Default for GcOptions {
  fn default() -> Self {
    Self {
      dry_run: false,
      keep_days: 30,
    }
  }
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub records_scanned: usize,
  pub records_deleted: usize,
  pub objects_scanned: usize,
  pub objects_deleted: usize,
  pub tmp_deleted: usize,
  pub bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.records_deleted + self.objects_deleted + self.tmp_deleted
  }
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

/// Prune the cache. The caller holds the exclusive store lock.
pub fn collect_garbage(cache: &ArtifactCache, paths: &CellarPaths, options: &GcOptions) -> Result<GcResult, GcError> {
  collect_garbage_at(cache, paths, options, now_secs())
}

fn collect_garbage_at(
  cache: &ArtifactCache,
  paths: &CellarPaths,
  options: &GcOptions,
  now: u64,
) -> Result<GcResult, GcError> {
  let mut stats = GcStats::default();
  let mut deleted_paths = Vec::new();

  let records = cache.records()?;
  stats.records_scanned = records.len();
  let (keep, drop) = partition_records(records, options.keep_days, now);

  for record in &drop {
    debug!(formula = %record.key.name, version = %record.key.pkg_version, "removing superseded record");
    if let Some(log) = &record.log_path
      && log.exists()
    {
      stats.bytes_freed += fs::metadata(log).map(|m| m.len()).unwrap_or(0);
      if !options.dry_run
        && let Err(e) = fs::remove_file(log)
      {
        warn!(path = %log.display(), error = %e, "failed to delete build log");
      }
      deleted_paths.push(log.clone());
    }
    if !options.dry_run {
      cache.remove_record(&record.key)?;
    }
    stats.records_deleted += 1;
  }

  let live: HashSet<&str> = keep.iter().map(|r| r.artifact_digest.0.as_str()).collect();
  let digests = cache.object_digests()?;
  stats.objects_scanned = digests.len();
  for digest in digests {
    if live.contains(digest.as_str()) {
      continue;
    }
    let path = cache.object_path(&digest);
    let size = dir_size(&path);
    debug!(path = %path.display(), "removing unreferenced object");
    if !options.dry_run {
      if let Err(e) = cache.remove_object(&digest) {
        warn!(path = %path.display(), error = %e, "failed to delete object");
        continue;
      }
    }
    stats.objects_deleted += 1;
    stats.bytes_freed += size;
    deleted_paths.push(path);
  }

  sweep_tmp(&paths.tmp_dir(), options.dry_run, &mut stats, &mut deleted_paths)?;

  info!(
    records_deleted = stats.records_deleted,
    objects_deleted = stats.objects_deleted,
    bytes_freed = stats.bytes_freed,
    dry_run = options.dry_run,
    "garbage collection complete"
  );

  Ok(GcResult { stats, deleted_paths })
}

/// Split records into kept and removable. The newest record of each
/// (name, platform) is kept regardless of age.
fn partition_records(records: Vec<BuildRecord>, keep_days: u64, now: u64) -> (Vec<BuildRecord>, Vec<BuildRecord>) {
  let mut newest: HashMap<(String, String), u64> = HashMap::new();
  for record in &records {
    let slot = newest
      .entry((record.key.name.clone(), record.key.platform.clone()))
      .or_insert(record.created_at);
    *slot = (*slot).max(record.created_at);
  }

  let cutoff = now.saturating_sub(keep_days.saturating_mul(SECS_PER_DAY));
  records.into_iter().partition(|record| {
    let is_newest = newest
      .get(&(record.key.name.clone(), record.key.platform.clone()))
      .is_some_and(|&at| at == record.created_at);
    is_newest || record.created_at >= cutoff
  })
}

/// Working directories under `tmp/` belong to no running build while the
/// exclusive lock is held.
fn sweep_tmp(tmp: &Path, dry_run: bool, stats: &mut GcStats, deleted_paths: &mut Vec<PathBuf>) -> Result<(), GcError> {
  let entries = match fs::read_dir(tmp) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(source) => {
      return Err(GcError::Read {
        path: tmp.to_path_buf(),
        source,
      });
    }
  };

  for entry in entries.flatten() {
    let path = entry.path();
    let size = dir_size(&path);
    if !dry_run {
      let removed = if path.is_dir() {
        fs::remove_dir_all(&path)
      } else {
        fs::remove_file(&path)
      };
      if let Err(e) = removed {
        warn!(path = %path.display(), error = %e, "failed to delete temporary directory");
        continue;
      }
    }
    stats.tmp_deleted += 1;
    stats.bytes_freed += size;
    deleted_paths.push(path);
  }
  Ok(())
}
