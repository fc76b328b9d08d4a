//! Test helpers for cellar-lib unit tests.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::formula::{FormulaView, SourceRef};
use crate::util::hash::{ContentHash, hash_file};

/// `/bin/sh -c <script>` as a step command and arguments.
pub fn sh(script: &str) -> (String, Vec<String>) {
  ("/bin/sh".to_string(), vec!["-c".to_string(), script.to_string()])
}

/// A minimal view with a url source and nothing to do.
pub fn view(name: &str) -> FormulaView {
  FormulaView {
    name: name.to_string(),
    version: "1.0".to_string(),
    revision: 0,
    source: SourceRef::Url {
      url: format!("file:///nonexistent/{name}-1.0.tar.gz"),
      mirrors: vec![],
      checksum: ContentHash("0".repeat(64)),
    },
    resources: vec![],
    dependencies: vec![],
    install: vec![],
    fixups: vec![],
    tests: vec![],
    bottle: None,
    keg_only: None,
  }
}

/// One file in a test archive: relative path, content, executable bit.
pub struct Entry<'a>(pub &'a str, pub &'a str, pub bool);

/// Write `<dir>/<file_name>` as a gzipped tarball whose entries all live
/// below `top/`. Returns its path and sha256.
pub fn tarball(dir: &Path, file_name: &str, top: &str, entries: &[Entry<'_>]) -> (PathBuf, ContentHash) {
  let path = dir.join(file_name);
  let file = File::create(&path).unwrap();
  let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
  for Entry(rel, content, executable) in entries {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(if *executable { 0o755 } else { 0o644 });
    header.set_mtime(0);
    header.set_cksum();
    builder
      .append_data(&mut header, format!("{top}/{rel}"), content.as_bytes())
      .unwrap();
  }
  builder.into_inner().unwrap().finish().unwrap();
  let digest = hash_file(&path).unwrap();
  (path, digest)
}

pub fn file_url(path: &Path) -> String {
  format!("file://{}", path.display())
}
