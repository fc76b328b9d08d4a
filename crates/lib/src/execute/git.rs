//! Git sources: clone a repository at a tag or branch.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::execute::types::ExecuteError;

fn git_err(repository: &str, e: impl std::fmt::Display) -> ExecuteError {
  ExecuteError::Git {
    repository: repository.to_string(),
    message: e.to_string(),
  }
}

/// Clone `repository` into `dest`, checked out at `reference` (a tag or
/// branch; the remote's default branch when `None`).
///
/// When `expected_revision` is given, the checked-out commit must equal it;
/// anything else is a [`ExecuteError::ChecksumMismatch`].
///
/// # Returns
///
/// The commit hash that was checked out.
pub async fn clone_at(
  repository: &str,
  reference: Option<&str>,
  expected_revision: Option<&str>,
  dest: &Path,
) -> Result<String, ExecuteError> {
  let repository = repository.to_string();
  let reference = reference.map(str::to_string);
  let dest: PathBuf = dest.to_path_buf();

  let commit = tokio::task::spawn_blocking({
    let repository = repository.clone();
    move || clone_blocking(&repository, reference.as_deref(), &dest)
  })
  .await
  .map_err(|e| ExecuteError::TaskPanicked(e.to_string()))??;

  if let Some(expected) = expected_revision
    && !commit.eq_ignore_ascii_case(expected)
  {
    return Err(ExecuteError::ChecksumMismatch {
      origin: repository,
      expected: expected.to_string(),
      actual: commit,
    });
  }

  Ok(commit)
}

fn clone_blocking(repository: &str, reference: Option<&str>, dest: &Path) -> Result<String, ExecuteError> {
  info!(repository, reference, path = %dest.display(), "cloning repository");

  let mut prepared = gix::prepare_clone(repository, dest).map_err(|e| git_err(repository, e))?;
  if let Some(reference) = reference {
    prepared = prepared
      .with_ref_name(Some(reference))
      .map_err(|e| git_err(repository, e))?;
  }

  let (mut checkout, _outcome) = prepared
    .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| git_err(repository, e))?;

  let (repo, _outcome) = checkout
    .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
    .map_err(|e| git_err(repository, e))?;

  let mut head = repo.head().map_err(|e| git_err(repository, e))?;
  let commit = head.peel_to_commit().map_err(|e| git_err(repository, e))?;
  let commit = commit.id.to_string();

  debug!(repository, rev = %commit, "checked out");
  Ok(commit)
}
