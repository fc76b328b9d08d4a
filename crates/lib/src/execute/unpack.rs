//! Archive extraction for sources and bottles.
//!
//! Supports:
//! - `.tar.gz` / `.tgz`
//! - `.tar`
//! - `.zip`
//!
//! Anything else is copied into the destination as a single file.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::execute::types::ExecuteError;

fn unpack_err(path: &Path, e: impl std::fmt::Display) -> ExecuteError {
  ExecuteError::Unpack {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// Extract `archive` into `dest` on the blocking pool.
///
/// # Returns
///
/// The directory the build should start in: the single top-level directory
/// of the archive when there is exactly one, `dest` otherwise.
pub async fn unpack_source(archive: &Path, dest: &Path) -> Result<PathBuf, ExecuteError> {
  let archive = archive.to_path_buf();
  let dest = dest.to_path_buf();
  tokio::task::spawn_blocking(move || {
    extract(&archive, &dest)?;
    enter_single_dir(&dest).map_err(|e| unpack_err(&dest, e))
  })
  .await
  .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))?
}

/// Extract `archive` into `dest` without entering any directory.
pub async fn unpack_into(archive: &Path, dest: &Path) -> Result<(), ExecuteError> {
  let archive = archive.to_path_buf();
  let dest = dest.to_path_buf();
  tokio::task::spawn_blocking(move || extract(&archive, &dest))
    .await
    .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))?
}

fn extract(archive: &Path, dest: &Path) -> Result<(), ExecuteError> {
  let name = archive
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| unpack_err(archive, "invalid archive path"))?;

  fs::create_dir_all(dest).map_err(|e| unpack_err(dest, e))?;

  // Download cache names carry a `<sha256>--` prefix; only the suffix matters.
  let result = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(archive).map_err(|e| unpack_err(archive, e))?;
    Archive::new(GzDecoder::new(BufReader::new(file))).unpack(dest)
  } else if name.ends_with(".tar") {
    let file = File::open(archive).map_err(|e| unpack_err(archive, e))?;
    Archive::new(BufReader::new(file)).unpack(dest)
  } else if name.ends_with(".zip") {
    unpack_zip(archive, dest)
  } else {
    let plain = name.split_once("--").map_or(name, |(_, rest)| rest);
    fs::copy(archive, dest.join(plain)).map(|_| ())
  };
  result.map_err(|e| unpack_err(archive, e))?;

  info!(archive = %archive.display(), dest = %dest.display(), "unpacked");
  Ok(())
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> io::Result<()> {
  let file = File::open(archive_path)?;
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(io::Error::other)?;

  for i in 0..archive.len() {
    let mut file = archive.by_index(i).map_err(io::Error::other)?;
    let path = file
      .enclosed_name()
      .ok_or_else(|| io::Error::other(format!("invalid zip entry name '{}'", file.name())))?;
    let dest_path = dest.join(path);

    if file.is_dir() {
      fs::create_dir_all(&dest_path)?;
      continue;
    }
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }
    let mut outfile = File::create(&dest_path)?;
    io::copy(&mut file, &mut outfile)?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = file.unix_mode() {
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))?;
      }
    }
  }
  Ok(())
}

/// The only entry of `dir` when it is a directory, else `dir` itself.
pub fn enter_single_dir(dir: &Path) -> io::Result<PathBuf> {
  let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
  if entries.len() == 1 && entries[0].file_type()?.is_dir() {
    let entered = entries.remove(0).path();
    debug!(path = %entered.display(), "entering top-level directory");
    return Ok(entered);
  }
  Ok(dir.to_path_buf())
}
