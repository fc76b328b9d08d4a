//! Filesystem helpers shared by the cache, the ledger and the executor.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The content is written to a temp file in the same directory and renamed
/// over the destination, so readers see either the old or the new file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
  let dir = path
    .parent()
    .ok_or_else(|| io::Error::other(format!("{} has no parent directory", path.display())))?;
  fs::create_dir_all(dir)?;

  let content = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
  let mut temp = tempfile::NamedTempFile::new_in(dir)?;
  temp.write_all(&content)?;
  temp.as_file().sync_all()?;
  temp.persist(path).map_err(|e| e.error)?;
  Ok(())
}

/// Recursively copy `src` into `dst`, preserving symlinks and permissions.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;
  for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    let target = dst.join(rel);
    let file_type = entry.file_type();
    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target)?;
    } else {
      fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  std::os::unix::fs::symlink(target, link)
}

/// Move `src` to `dst`, falling back to copy + delete across filesystems.
pub fn move_tree(src: &Path, dst: &Path) -> io::Result<()> {
  match fs::rename(src, dst) {
    Ok(()) => Ok(()),
    Err(_) => {
      copy_tree(src, dst)?;
      fs::remove_dir_all(src)
    }
  }
}
