//! Installation snapshot builder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::util::hash::hash_file;

use super::types::{InstallationSnapshot, LocalFile, ProtectedPaths};

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("install root not found: {0}")]
  RootNotFound(PathBuf),

  #[error("install root is not a directory: {0}")]
  NotADirectory(PathBuf),

  #[error("snapshot task failed: {0}")]
  Task(String),
}

/// Inventory every file under `root`, skipping protected paths.
///
/// Read-only. A file that cannot be read is recorded with a `None` hash and
/// an unreadable directory is skipped, so one locked file never blocks a
/// check cycle. Only a missing root is an error.
pub fn build_snapshot(root: &Path, protected: &ProtectedPaths) -> Result<InstallationSnapshot, ScanError> {
  if !root.exists() {
    return Err(ScanError::RootNotFound(root.to_path_buf()));
  }
  if !root.is_dir() {
    return Err(ScanError::NotADirectory(root.to_path_buf()));
  }

  let mut files = BTreeMap::new();

  let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
    entry.depth() == 0 || relative_path(root, entry.path()).is_none_or(|rel| !protected.is_protected(&rel))
  });

  for entry in walker {
    let entry = match entry {
      Ok(entry) => entry,
      Err(e) => {
        warn!(error = %e, "skipping unreadable entry");
        continue;
      }
    };

    if !entry.file_type().is_file() {
      continue;
    }

    let Some(relative) = relative_path(root, entry.path()) else {
      continue;
    };

    let metadata = entry.metadata().ok();
    let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
    let modified = metadata
      .and_then(|m| m.modified().ok())
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .map(|d| d.as_secs());

    let hash = match hash_file(entry.path()) {
      Ok(hash) => Some(hash),
      Err(e) => {
        warn!(path = %relative, error = %e.source, "file unreadable, recording null hash");
        None
      }
    };

    debug!(path = %relative, size, "scanned");
    files.insert(relative, LocalFile { hash, size, modified });
  }

  info!(root = %root.display(), files = files.len(), "snapshot built");

  Ok(InstallationSnapshot {
    root: root.to_path_buf(),
    files,
  })
}

/// Run [`build_snapshot`] on the blocking pool.
pub async fn build_snapshot_async(root: &Path, protected: &ProtectedPaths) -> Result<InstallationSnapshot, ScanError> {
  let root = root.to_path_buf();
  let protected = protected.clone();
  tokio::task::spawn_blocking(move || build_snapshot(&root, &protected))
    .await
    .map_err(|e| ScanError::Task(e.to_string()))?
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(root).ok()?;
  let joined = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/");
  (!joined.is_empty()).then_some(joined)
}
