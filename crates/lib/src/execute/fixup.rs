//! Post-install fixups applied to a finished prefix.
//!
//! Every fixup checks the tree before changing it, so applying the same list
//! twice leaves the tree exactly as after the first pass.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::{Compression, GzBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::execute::types::ExecuteError;
use crate::formula::Fixup;
use crate::util::fs::symlink;

/// Apply `fixups` in order to the tree at `prefix`.
pub fn apply_fixups(prefix: &Path, fixups: &[Fixup]) -> Result<(), ExecuteError> {
  for (index, fixup) in fixups.iter().enumerate() {
    apply(prefix, fixup).map_err(|e| ExecuteError::Fixup {
      index,
      message: e.to_string(),
    })?;
  }
  Ok(())
}

fn apply(prefix: &Path, fixup: &Fixup) -> io::Result<()> {
  match fixup {
    Fixup::Symlink { target, link } => ensure_symlink(Path::new(target), &prefix.join(link)),
    Fixup::LinkAll { from, to } => link_all(prefix, Path::new(from), Path::new(to)),
    Fixup::Gzip { dir, suffix } => gzip_matching(&prefix.join(dir), suffix),
  }
}

/// Make `link` a symlink to `target`. An existing link to the same target is
/// left alone; one pointing elsewhere is replaced.
fn ensure_symlink(target: &Path, link: &Path) -> io::Result<()> {
  match fs::symlink_metadata(link) {
    Ok(meta) if meta.file_type().is_symlink() => {
      if fs::read_link(link)? == target {
        return Ok(());
      }
      fs::remove_file(link)?;
    }
    Ok(_) => {
      return Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{} exists and is not a symlink", link.display()),
      ));
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => return Err(e),
  }

  if let Some(parent) = link.parent() {
    fs::create_dir_all(parent)?;
  }
  debug!(link = %link.display(), target = %target.display(), "creating symlink");
  symlink(target, link)
}

/// Link every entry of `prefix/from` into `prefix/to` with relative targets.
fn link_all(prefix: &Path, from: &Path, to: &Path) -> io::Result<()> {
  let source_dir = prefix.join(from);
  let mut names: Vec<_> = fs::read_dir(&source_dir)?
    .map(|e| e.map(|e| e.file_name()))
    .collect::<Result<_, _>>()?;
  names.sort();

  let back = relative_to(from, to);
  for name in names {
    ensure_symlink(&back.join(&name), &prefix.join(to).join(&name))?;
  }
  Ok(())
}

/// Path from directory `to` to directory `from`, both relative to the same
/// root.
fn relative_to(from: &Path, to: &Path) -> PathBuf {
  let depth = to.components().filter(|c| matches!(c, Component::Normal(_))).count();
  let mut path = PathBuf::new();
  for _ in 0..depth {
    path.push("..");
  }
  path.join(from)
}

/// Gzip every regular file below `dir` whose name ends with `suffix`.
fn gzip_matching(dir: &Path, suffix: &str) -> io::Result<()> {
  if !dir.exists() {
    return Ok(());
  }

  let mut targets = Vec::new();
  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    if !entry.file_type().is_file() {
      continue;
    }
    let name = entry.file_name().to_string_lossy();
    if name.ends_with(suffix) && !name.ends_with(".gz") {
      targets.push(entry.into_path());
    }
  }

  for path in targets {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    debug!(path = %path.display(), "compressing");
    let mut input = BufReader::new(File::open(&path)?);
    let output = File::create(&gz_path)?;
    // Fixed mtime and no file name keep the output reproducible.
    let mut encoder = GzBuilder::new().mtime(0).write(output, Compression::best());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(&path)?;
  }
  Ok(())
}
