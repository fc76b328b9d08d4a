//! Source and bottle downloads with SHA256 verification.
//!
//! Downloads land in the shared downloads directory as
//! `<sha256>--<filename>`; a file already there whose hash still matches is
//! reused without touching the network. `file://` URLs are read from disk.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::execute::types::ExecuteError;
use crate::util::hash::ContentHash;

/// Fetch the first reachable URL of `urls` and verify it against `expected`.
///
/// URLs are tried in order; only transport failures move on to the next
/// one. A checksum mismatch fails immediately.
///
/// # Returns
///
/// The path of the verified file in `downloads_dir`.
pub async fn fetch_verified(urls: &[&str], expected: &ContentHash, downloads_dir: &Path) -> Result<PathBuf, ExecuteError> {
  let Some(primary) = urls.first() else {
    return Err(ExecuteError::Fetch {
      url: String::new(),
      message: "no URL to fetch".to_string(),
    });
  };

  fs::create_dir_all(downloads_dir).await?;
  let dest_path = downloads_dir.join(format!("{}--{}", expected, url_to_filename(primary)));

  if dest_path.exists() {
    debug!(path = ?dest_path, "checking cached download");
    if let Ok(bytes) = fs::read(&dest_path).await {
      let actual = sha256_hex(&bytes);
      if actual == expected.as_str() {
        info!(path = ?dest_path, "using cached download");
        return Ok(dest_path);
      }
      debug!(expected = %expected, actual = %actual, "cached download hash mismatch, re-downloading");
    }
  }

  let mut last_error = None;
  for url in urls {
    info!(url = %url, "fetching");
    let bytes = match fetch_bytes(url).await {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(url = %url, error = %e, "fetch failed");
        last_error = Some(e);
        continue;
      }
    };

    let actual = sha256_hex(&bytes);
    if actual != expected.as_str() {
      return Err(ExecuteError::ChecksumMismatch {
        origin: url.to_string(),
        expected: expected.to_string(),
        actual,
      });
    }

    let partial = dest_path.with_extension("part");
    let mut file = fs::File::create(&partial).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    fs::rename(&partial, &dest_path).await?;

    info!(path = ?dest_path, size = bytes.len(), "download complete");
    return Ok(dest_path);
  }

  Err(last_error.unwrap_or_else(|| ExecuteError::Fetch {
    url: primary.to_string(),
    message: "no URL could be fetched".to_string(),
  }))
}

/// Read the bytes behind `url` (`http(s)://` or `file://`).
async fn fetch_bytes(url: &str) -> Result<Vec<u8>, ExecuteError> {
  let fetch_err = |message: String| ExecuteError::Fetch {
    url: url.to_string(),
    message,
  };

  if let Some(path) = url.strip_prefix("file://") {
    return fs::read(path).await.map_err(|e| fetch_err(e.to_string()));
  }
  if !(url.starts_with("http://") || url.starts_with("https://")) {
    return Err(fetch_err("unsupported URL scheme".to_string()));
  }

  let response = reqwest::get(url).await.map_err(|e| fetch_err(e.to_string()))?;
  if !response.status().is_success() {
    return Err(fetch_err(format!("HTTP {}", response.status())));
  }
  let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
  Ok(bytes.to_vec())
}

fn sha256_hex(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  if let Some(filename) = url.rsplit('/').next() {
    let filename = filename.split('?').next().unwrap_or(filename);

    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  format!("download_{}", &sha256_hex(url.as_bytes())[..16])
}
