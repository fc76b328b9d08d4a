//! Content-addressed artifact cache.
//!
//! ```text
//! <root>/cache/objects/<sha256>/     artifact trees, files read-only
//! <root>/cache/records/<key>.json    BuildRecord per BuildKey
//! ```
//!
//! Objects are shared by every record with the same digest. Trees are hashed
//! outside the write lock, which only covers the compare-and-rename and the
//! record write; reads take no lock. `get_or_build` guarantees at most one
//! build per key within a process.
//!
//! Every operation here walks the filesystem. Async callers go through
//! [`ArtifactCache::store_async`] and [`ArtifactCache::retrieve_async`], which
//! run on the blocking pool.

mod record;

pub use record::{ArtifactOrigin, BuildKey, BuildRecord, CachedArtifact, RecordStatus};

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::execute::ExecuteError;
use crate::platform::paths::CellarPaths;
use crate::util::fs::{move_tree, write_json_atomic};
use crate::util::hash::{DirHashError, HashError, Hashable, ObjectHash, hash_directory};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to hash artifact: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to compute key: {0}")]
  Key(#[from] HashError),

  #[error("unreadable record {path}: {message}")]
  Record { path: PathBuf, message: String },

  #[error("no record for {0}")]
  MissingRecord(String),

  #[error("cache corruption for {key}: recorded digest {expected}, tree digest {actual}")]
  Corruption {
    key: String,
    expected: String,
    actual: String,
  },

  #[error("cache task failed: {0}")]
  Task(String),
}

impl From<CacheError> for ExecuteError {
  fn from(e: CacheError) -> Self {
    match e {
      CacheError::Corruption { key, expected, actual } => ExecuteError::CacheCorruption { key, expected, actual },
      other => ExecuteError::Cache(other.to_string()),
    }
  }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
  move |source| CacheError::Io {
    path: path.to_path_buf(),
    source,
  }
}

type Flight = Arc<OnceCell<Result<CachedArtifact, ExecuteError>>>;

/// Handle to the on-disk cache. Clones share the write lock and the
/// in-flight table.
#[derive(Clone)]
pub struct ArtifactCache {
  objects_dir: PathBuf,
  records_dir: PathBuf,
  write_lock: Arc<Mutex<()>>,
  inflight: Arc<Mutex<HashMap<ObjectHash, Flight>>>,
}

impl ArtifactCache {
  pub fn new(paths: &CellarPaths) -> Self {
    Self {
      objects_dir: paths.objects_dir(),
      records_dir: paths.records_dir(),
      write_lock: Arc::new(Mutex::new(())),
      inflight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn objects_dir(&self) -> &Path {
    &self.objects_dir
  }

  pub fn object_path(&self, digest: &str) -> PathBuf {
    self.objects_dir.join(digest)
  }

  fn record_path(&self, key_hash: &ObjectHash) -> PathBuf {
    self.records_dir.join(format!("{key_hash}.json"))
  }

  fn lock_writes(&self) -> MutexGuard<'_, ()> {
    self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn read_record(&self, path: &Path) -> Result<Option<BuildRecord>, CacheError> {
    match fs::read_to_string(path) {
      Ok(text) => serde_json::from_str(&text).map(Some).map_err(|e| CacheError::Record {
        path: path.to_path_buf(),
        message: e.to_string(),
      }),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(io_err(path)(e)),
    }
  }

  fn object_intact(&self, object: &Path, record: &BuildRecord) -> Result<bool, CacheError> {
    Ok(object.is_dir() && hash_directory(object, &[])? == record.artifact_digest)
  }

  /// The record stored for `key`, without checking its object.
  pub fn record(&self, key: &BuildKey) -> Result<Option<BuildRecord>, CacheError> {
    self.read_record(&self.record_path(&key.compute_hash()?))
  }

  /// Store the tree at `tree` as the artifact for `key`.
  ///
  /// The tree is moved into the object store (or dropped when an identical
  /// object already exists). A new record is written atomically unless one
  /// already exists for `key`, in which case it is returned unchanged.
  ///
  /// # Errors
  ///
  /// `CacheError::Corruption` when a record for `key` already exists with a
  /// different digest.
  pub fn store(
    &self,
    key: &BuildKey,
    tree: &Path,
    log_path: Option<PathBuf>,
    origin: ArtifactOrigin,
  ) -> Result<CachedArtifact, CacheError> {
    let digest = hash_directory(tree, &[])?;
    let key_hash = key.compute_hash()?;
    let record_path = self.record_path(&key_hash);

    let _guard = self.lock_writes();
    let existing = self.read_record(&record_path)?;
    if let Some(existing) = &existing
      && existing.artifact_digest != digest
    {
      return Err(CacheError::Corruption {
        key: format!("{}@{}", key.name, key.pkg_version),
        expected: existing.artifact_digest.0.clone(),
        actual: digest.0,
      });
    }

    let object = self.object_path(&digest.0);
    if object.exists() {
      debug!(digest = %digest, "object already present");
    } else {
      fs::create_dir_all(&self.objects_dir).map_err(io_err(&self.objects_dir))?;
      let staging = self.objects_dir.join(format!(".{}.tmp", digest.0));
      if staging.exists() {
        fs::remove_dir_all(&staging).map_err(io_err(&staging))?;
      }
      move_tree(tree, &staging).map_err(io_err(&staging))?;
      make_read_only(&staging).map_err(io_err(&staging))?;
      fs::rename(&staging, &object).map_err(io_err(&object))?;
    }

    if let Some(record) = existing {
      debug!(formula = %key.name, digest = %record.artifact_digest, "artifact already recorded");
      return Ok(CachedArtifact { record, path: object });
    }

    let record = BuildRecord {
      key: key.clone(),
      artifact_digest: digest,
      origin,
      log_path,
      status: RecordStatus::Built,
      created_at: now_secs(),
    };
    write_json_atomic(&record_path, &record).map_err(io_err(&record_path))?;

    info!(formula = %key.name, version = %key.pkg_version, digest = %record.artifact_digest, "stored artifact");
    Ok(CachedArtifact { record, path: object })
  }

  /// [`store`](Self::store) on the blocking pool.
  pub async fn store_async(
    &self,
    key: &BuildKey,
    tree: &Path,
    log_path: Option<PathBuf>,
    origin: ArtifactOrigin,
  ) -> Result<CachedArtifact, CacheError> {
    let cache = self.clone();
    let key = key.clone();
    let tree = tree.to_path_buf();
    tokio::task::spawn_blocking(move || cache.store(&key, &tree, log_path, origin))
      .await
      .map_err(|e| CacheError::Task(e.to_string()))?
  }

  /// Look up the artifact for `key`.
  ///
  /// The object is re-hashed on every lookup. A missing or corrupted object
  /// is removed and reported as a miss; the record stays, so the rebuild
  /// that follows must reproduce its digest.
  pub fn retrieve(&self, key: &BuildKey) -> Result<Option<CachedArtifact>, CacheError> {
    let key_hash = key.compute_hash()?;
    let record_path = self.record_path(&key_hash);
    let Some(record) = self.read_record(&record_path)? else {
      return Ok(None);
    };

    let object = self.object_path(&record.artifact_digest.0);
    if self.object_intact(&object, &record)? {
      debug!(formula = %key.name, digest = %record.artifact_digest, "cache hit");
      return Ok(Some(CachedArtifact { record, path: object }));
    }

    let _guard = self.lock_writes();
    // A concurrent store may have put the object back in the meantime.
    if self.object_intact(&object, &record)? {
      return Ok(Some(CachedArtifact { record, path: object }));
    }
    warn!(formula = %key.name, digest = %record.artifact_digest, "cached object missing or corrupted, discarding");
    if object.exists() {
      remove_object_dir(&object).map_err(io_err(&object))?;
    }
    Ok(None)
  }

  /// [`retrieve`](Self::retrieve) on the blocking pool.
  pub async fn retrieve_async(&self, key: &BuildKey) -> Result<Option<CachedArtifact>, CacheError> {
    let cache = self.clone();
    let key = key.clone();
    tokio::task::spawn_blocking(move || cache.retrieve(&key))
      .await
      .map_err(|e| CacheError::Task(e.to_string()))?
  }

  /// Retrieve `key`, or run `builder` to produce it.
  ///
  /// Concurrent callers for the same key share one builder invocation and
  /// all receive its result, success or failure.
  ///
  /// # Returns
  ///
  /// The artifact and whether this caller's builder ran.
  pub async fn get_or_build<F, Fut>(&self, key: &BuildKey, builder: F) -> Result<(CachedArtifact, bool), ExecuteError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedArtifact, ExecuteError>>,
  {
    let key_hash = key.compute_hash().map_err(CacheError::from)?;
    let flight: Flight = {
      let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
      inflight.entry(key_hash.clone()).or_default().clone()
    };

    let ran = AtomicBool::new(false);
    let ran_ref = &ran;
    let result = flight
      .get_or_init(|| async move {
        match self.retrieve_async(key).await {
          Ok(Some(hit)) => Ok(hit),
          Ok(None) => {
            ran_ref.store(true, Ordering::SeqCst);
            builder().await
          }
          Err(e) => Err(ExecuteError::from(e)),
        }
      })
      .await
      .clone();

    {
      let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
      if inflight.get(&key_hash).is_some_and(|f| Arc::ptr_eq(f, &flight)) {
        inflight.remove(&key_hash);
      }
    }

    result.map(|artifact| (artifact, ran.load(Ordering::SeqCst)))
  }

  /// Flip the status of the record for `key`. Nothing else in a record
  /// changes after creation.
  pub fn set_status(&self, key: &BuildKey, status: RecordStatus) -> Result<BuildRecord, CacheError> {
    let _guard = self.lock_writes();
    let record_path = self.record_path(&key.compute_hash()?);
    let mut record = self
      .read_record(&record_path)?
      .ok_or_else(|| CacheError::MissingRecord(format!("{}@{}", key.name, key.pkg_version)))?;
    if record.status != status {
      record.status = status;
      write_json_atomic(&record_path, &record).map_err(io_err(&record_path))?;
      debug!(formula = %key.name, status = ?status, "record status updated");
    }
    Ok(record)
  }

  /// Every readable record. Unreadable files are skipped with a warning.
  pub fn records(&self) -> Result<Vec<BuildRecord>, CacheError> {
    let entries = match fs::read_dir(&self.records_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_err(&self.records_dir)(e)),
    };

    let mut records = Vec::new();
    for entry in entries {
      let path = entry.map_err(io_err(&self.records_dir))?.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      match self.read_record(&path) {
        Ok(Some(record)) => records.push(record),
        Ok(None) => {}
        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
      }
    }
    records.sort_by(|a, b| (&a.key.name, a.created_at).cmp(&(&b.key.name, b.created_at)));
    Ok(records)
  }

  /// Delete the record for `key`.
  pub fn remove_record(&self, key: &BuildKey) -> Result<(), CacheError> {
    let _guard = self.lock_writes();
    let path = self.record_path(&key.compute_hash()?);
    fs::remove_file(&path).map_err(io_err(&path))
  }

  /// Digests of every object in the store.
  pub fn object_digests(&self) -> Result<Vec<String>, CacheError> {
    let entries = match fs::read_dir(&self.objects_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(io_err(&self.objects_dir)(e)),
    };
    let mut digests = Vec::new();
    for entry in entries {
      let entry = entry.map_err(io_err(&self.objects_dir))?;
      if let Some(name) = entry.file_name().to_str()
        && !name.starts_with('.')
      {
        digests.push(name.to_string());
      }
    }
    digests.sort();
    Ok(digests)
  }

  /// Delete an object tree.
  pub fn remove_object(&self, digest: &str) -> Result<(), CacheError> {
    let _guard = self.lock_writes();
    let path = self.object_path(digest);
    remove_object_dir(&path).map_err(io_err(&path))
  }
}

fn now_secs() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or_default()
}

/// Drop write permission from every regular file below `path`.
fn make_read_only(path: &Path) -> io::Result<()> {
  for entry in walkdir::WalkDir::new(path) {
    let entry = entry.map_err(io::Error::other)?;
    if entry.file_type().is_file() {
      let mut perms = entry.metadata().map_err(io::Error::other)?.permissions();
      perms.set_readonly(true);
      fs::set_permissions(entry.path(), perms)?;
    }
  }
  Ok(())
}

/// Remove an object tree. Only files are read-only, so their directories
/// can still be unlinked.
fn remove_object_dir(path: &Path) -> io::Result<()> {
  fs::remove_dir_all(path)
}
