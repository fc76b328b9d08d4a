use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::hash::{ContentHash, Hashable};

/// Identity of one build: any change to these fields yields a new record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildKey {
  pub name: String,
  pub pkg_version: String,
  pub platform: String,
  /// Full hash of the platform view.
  pub formula_hash: ContentHash,
  /// Digest over the records of every build/runtime dependency.
  pub closure_digest: ContentHash,
}

impl Hashable for BuildKey {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
  Built,
  TestFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
  Source,
  Bottle,
}

/// Persisted result of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
  pub key: BuildKey,
  pub artifact_digest: ContentHash,
  pub origin: ArtifactOrigin,
  pub log_path: Option<PathBuf>,
  pub status: RecordStatus,
  /// Seconds since the Unix epoch.
  pub created_at: u64,
}

impl BuildRecord {
  pub fn closure_digest(&self) -> &ContentHash {
    &self.key.closure_digest
  }
}

/// A record together with the location of its materialized tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
  pub record: BuildRecord,
  pub path: PathBuf,
}
