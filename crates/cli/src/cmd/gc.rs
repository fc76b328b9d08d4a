use std::time::Instant;

use anyhow::{Context, Result};

use cellar_lib::cache::ArtifactCache;
use cellar_lib::gc::{GcOptions, collect_garbage};
use cellar_lib::platform::paths::CellarPaths;
use cellar_lib::store_lock::{LockMode, StoreLock};

use crate::output::{OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success};

pub fn cmd_gc(dry_run: bool, keep_days: u64, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let paths = CellarPaths::from_env();

  let _lock = StoreLock::acquire(&paths, LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;

  let cache = ArtifactCache::new(&paths);
  let result = collect_garbage(&cache, &paths, &GcOptions { dry_run, keep_days })?;

  if output.is_json() {
    print_json(&result)?;
  } else {
    println!();
    if dry_run {
      print_info("Dry run - no changes made");
    } else {
      print_success("Garbage collection complete!");
    }
    print_stat("Records removed", &result.stats.records_deleted.to_string());
    print_stat("Artifacts removed", &result.stats.objects_deleted.to_string());
    print_stat("Temporary directories removed", &result.stats.tmp_deleted.to_string());
    print_stat("Space freed", &format_bytes(result.stats.bytes_freed));
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  Ok(())
}
