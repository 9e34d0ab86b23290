//! Apply engine.
//!
//! Executes an [`UpdatePlan`] against the install tree in two steps:
//!
//! 1. [`ApplyEngine::stage`] downloads every incoming file into
//!    `_temp_update/` with bounded concurrency. Nothing in the tree changes.
//! 2. [`ApplyEngine::commit`] deletes stale paths, creates parent
//!    directories and moves verified staged files into place.
//!
//! Per-file failures are absorbed into the [`ApplyReport`]. A destination
//! that is locked by a running process is moved to `_pending/` and recorded
//! for the next start instead of failing. Only errors that leave the engine
//! unable to continue safely are returned as [`ApplyError`].

mod pending;
mod state;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use pending::{PendingError, PendingReplacements, PendingReport, PendingSwap, apply_pending, pending_path};
pub use state::VersionRecord;

use crate::platform::paths::{pending_dir, staging_dir};
use crate::download::{DownloadManager, StagedDownload};
use crate::manifest::{FileEntry, RestartClass};
use crate::snapshot::UpdatePlan;

#[derive(Debug, Error)]
pub enum ApplyError {
  #[error("install root {0} is missing")]
  RootMissing(PathBuf),

  #[error("failed to prepare staging directory {path}: {source}")]
  Staging {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to record deferred replacements: {0}")]
  Pending(#[from] PendingError),

  #[error("apply task did not complete: {0}")]
  Interrupted(String),
}

/// Filesystem operations that may hit a locked file.
///
/// The default implementation uses plain removes and renames. Tests substitute
/// one that simulates files held open by the running process.
pub trait FileSwap: Send + Sync {
  fn remove(&self, path: &Path) -> io::Result<()>;

  /// Move `staged` over `dest`, replacing it if present.
  fn replace(&self, staged: &Path, dest: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenameSwap;

impl FileSwap for RenameSwap {
  fn remove(&self, path: &Path) -> io::Result<()> {
    fs::remove_file(path)
  }

  fn replace(&self, staged: &Path, dest: &Path) -> io::Result<()> {
    fs::rename(staged, dest)
  }
}

/// True if `err` means the file is held open by some process.
pub fn is_locked(err: &io::Error) -> bool {
  matches!(
    err.kind(),
    io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy
  ) || (cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33)))
}

/// What happened to one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
  Replaced { path: String, class: RestartClass },
  /// Staged under `_pending/`; swapped in at next start.
  Deferred { path: String, class: RestartClass },
  Deleted { path: String },
  Failed { path: String, reason: String },
}

impl FileOutcome {
  pub fn path(&self) -> &str {
    match self {
      FileOutcome::Replaced { path, .. }
      | FileOutcome::Deferred { path, .. }
      | FileOutcome::Deleted { path }
      | FileOutcome::Failed { path, .. } => path,
    }
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, FileOutcome::Failed { .. })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
  pub outcomes: Vec<FileOutcome>,
}

impl ApplyReport {
  /// Deleted, replaced and deferred paths.
  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|o| !o.is_failure()).count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_failure()).count()
  }

  pub fn deferred(&self) -> Vec<&str> {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o, FileOutcome::Deferred { .. }))
      .map(FileOutcome::path)
      .collect()
  }

  pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
    self.outcomes.iter().filter(|o| o.is_failure())
  }

  /// Files replaced in place whose class allows an in-process reload.
  pub fn hot_reloadable(&self) -> Vec<&str> {
    self
      .outcomes
      .iter()
      .filter_map(|o| match o {
        FileOutcome::Replaced {
          path,
          class: RestartClass::None,
        } => Some(path.as_str()),
        _ => None,
      })
      .collect()
  }

  /// Restart requirement of what was actually installed. A deferred file
  /// only takes effect after a restart, so it counts as at least soft.
  pub fn restart_tier(&self) -> RestartClass {
    self
      .outcomes
      .iter()
      .map(|o| match o {
        FileOutcome::Replaced { class, .. } => *class,
        FileOutcome::Deferred { class, .. } => (*class).max(RestartClass::Soft),
        _ => RestartClass::None,
      })
      .max()
      .unwrap_or_default()
  }
}

/// Downloads for a plan, staged and verified but not yet installed.
#[derive(Debug)]
pub struct StagedPlan {
  pub downloads: Vec<StagedDownload>,
}

impl StagedPlan {
  pub fn failed(&self) -> usize {
    self.downloads.iter().filter(|d| d.result.is_err()).count()
  }
}

#[derive(Clone)]
pub struct ApplyEngine {
  root: PathBuf,
  downloads: DownloadManager,
  swap: Arc<dyn FileSwap>,
  parallelism: usize,
}

impl std::fmt::Debug for ApplyEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApplyEngine")
      .field("root", &self.root)
      .field("downloads", &self.downloads)
      .field("parallelism", &self.parallelism)
      .finish()
  }
}

impl ApplyEngine {
  pub fn new(root: impl Into<PathBuf>, downloads: DownloadManager, parallelism: usize) -> Self {
    Self {
      root: root.into(),
      downloads,
      swap: Arc::new(RenameSwap),
      parallelism,
    }
  }

  pub fn with_swap(mut self, swap: Arc<dyn FileSwap>) -> Self {
    self.swap = swap;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn staging_dir(&self) -> PathBuf {
    staging_dir(&self.root)
  }

  /// Download every incoming entry of `plan` into a fresh staging directory.
  pub async fn stage(
    &self,
    plan: &UpdatePlan,
    on_done: impl FnMut(usize, &FileEntry, bool),
  ) -> Result<StagedPlan, ApplyError> {
    let staging = self.staging_dir();
    let staging_err = |source| ApplyError::Staging {
      path: staging.clone(),
      source,
    };

    match tokio::fs::remove_dir_all(&staging).await {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(staging_err(e)),
    }
    tokio::fs::create_dir_all(&staging).await.map_err(staging_err)?;

    let entries: Vec<FileEntry> = plan.incoming().cloned().collect();
    info!(files = entries.len(), bytes = plan.total_bytes, "staging downloads");

    let downloads = self.downloads.fetch_all(entries, &staging, self.parallelism, on_done).await;
    let staged = StagedPlan { downloads };

    info!(failed = staged.failed(), "staging complete");
    Ok(staged)
  }

  /// Install a staged plan: deletes, parent directories, then moves.
  ///
  /// `on_outcome` is called for every path as it is settled.
  pub fn commit(
    &self,
    plan: &UpdatePlan,
    staged: StagedPlan,
    mut on_outcome: impl FnMut(&FileOutcome),
  ) -> Result<ApplyReport, ApplyError> {
    if !self.root.is_dir() {
      return Err(ApplyError::RootMissing(self.root.clone()));
    }

    let mut report = ApplyReport::default();
    let mut record = |outcome: FileOutcome, report: &mut ApplyReport| {
      on_outcome(&outcome);
      report.outcomes.push(outcome);
    };

    for path in &plan.delete {
      let outcome = self.delete(path);
      record(outcome, &mut report);
    }

    let mut deferred = Vec::new();

    for StagedDownload { entry, result } in staged.downloads {
      let staged_path = match result {
        Ok((path, _source)) => path,
        Err(e) => {
          warn!(path = %entry.path, error = %e, "skipping file");
          let outcome = FileOutcome::Failed {
            path: entry.path,
            reason: e.to_string(),
          };
          record(outcome, &mut report);
          continue;
        }
      };

      let dest = self.root.join(&entry.path);
      if let Some(parent) = dest.parent()
        && let Err(e) = fs::create_dir_all(parent)
      {
        warn!(path = %entry.path, error = %e, "failed to create parent directory");
        let outcome = FileOutcome::Failed {
          path: entry.path,
          reason: e.to_string(),
        };
        record(outcome, &mut report);
        continue;
      }

      let outcome = match self.swap.replace(&staged_path, &dest) {
        Ok(()) => {
          debug!(path = %entry.path, class = %entry.restart_class, "replaced");
          FileOutcome::Replaced {
            path: entry.path,
            class: entry.restart_class,
          }
        }
        Err(e) if is_locked(&e) => match self.defer(&entry, &staged_path) {
          Ok(swap) => {
            info!(path = %entry.path, "destination locked, deferring to next start");
            deferred.push(swap);
            FileOutcome::Deferred {
              path: entry.path,
              class: entry.restart_class,
            }
          }
          Err(e) => {
            warn!(path = %entry.path, error = %e, "failed to stage deferred replacement");
            FileOutcome::Failed {
              path: entry.path,
              reason: e.to_string(),
            }
          }
        },
        Err(e) => {
          warn!(path = %entry.path, error = %e, "failed to move file into place");
          FileOutcome::Failed {
            path: entry.path,
            reason: e.to_string(),
          }
        }
      };
      record(outcome, &mut report);
    }

    PendingReplacements::record(&self.root, deferred)?;
    self.cleanup_staging();

    info!(
      succeeded = report.succeeded(),
      failed = report.failed(),
      deferred = report.deferred().len(),
      tier = %report.restart_tier(),
      "apply complete"
    );
    Ok(report)
  }

  /// Stage and commit in one call.
  pub async fn apply(&self, plan: &UpdatePlan) -> Result<ApplyReport, ApplyError> {
    let staged = self.stage(plan, |_, _, _| {}).await?;
    self.commit(plan, staged, |_| {})
  }

  fn delete(&self, relative: &str) -> FileOutcome {
    let path = self.root.join(relative);
    match self.swap.remove(&path) {
      Ok(()) => {
        debug!(path = %relative, "deleted");
        self.remove_empty_parents(&path);
        FileOutcome::Deleted {
          path: relative.to_string(),
        }
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => FileOutcome::Deleted {
        path: relative.to_string(),
      },
      Err(e) => {
        warn!(path = %relative, error = %e, "failed to delete");
        FileOutcome::Failed {
          path: relative.to_string(),
          reason: e.to_string(),
        }
      }
    }
  }

  fn defer(&self, entry: &FileEntry, staged: &Path) -> io::Result<PendingSwap> {
    let swap = PendingSwap::for_path(&entry.path);
    let target = self.root.join(&swap.source);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::rename(staged, &target)?;
    Ok(swap)
  }

  fn remove_empty_parents(&self, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
      if dir == self.root || fs::remove_dir(dir).is_err() {
        break;
      }
      current = dir.parent();
    }
  }

  pub fn cleanup_staging(&self) {
    let staging = self.staging_dir();
    if let Err(e) = fs::remove_dir_all(&staging)
      && e.kind() != io::ErrorKind::NotFound
    {
      warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
    }
  }

  /// Directory holding staged files for deferred swaps.
  pub fn pending_dir(&self) -> PathBuf {
    pending_dir(&self.root)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::Manifest;
  use crate::snapshot::{ProtectedPaths, build_snapshot, compute_plan};
  use crate::util::testutil::{manifest, offline_downloads, write_file};
  use std::collections::HashSet;
  use tempfile::TempDir;

  /// Reports destinations in `locked` as held open by another process.
  struct LockingSwap {
    locked: HashSet<String>,
  }

  impl FileSwap for LockingSwap {
    fn remove(&self, path: &Path) -> io::Result<()> {
      RenameSwap.remove(path)
    }

    fn replace(&self, staged: &Path, dest: &Path) -> io::Result<()> {
      let name = dest.file_name().unwrap().to_string_lossy().to_string();
      if self.locked.contains(&name) {
        return Err(io::Error::from(io::ErrorKind::PermissionDenied));
      }
      RenameSwap.replace(staged, dest)
    }
  }

  fn plan_for(root: &Path, m: &Manifest) -> UpdatePlan {
    let snapshot = build_snapshot(root, &ProtectedPaths::default()).unwrap();
    compute_plan(&snapshot, m, &ProtectedPaths::default())
  }

  #[tokio::test]
  async fn applies_adds_updates_and_deletes() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a.py", b"old-a");
    write_file(temp.path(), "stale/old.py", b"old");

    let m = manifest(
      "1.1.0",
      &[("a.py", b"new-a", RestartClass::None), ("pkg/b.py", b"new-b", RestartClass::Soft)],
      "http://unused.invalid",
    );
    let plan = plan_for(temp.path(), &m);
    let downloads = offline_downloads(
      &temp.path().join("_update_cache"),
      &[("a.py", b"new-a"), ("pkg/b.py", b"new-b")],
    );

    let report = ApplyEngine::new(temp.path(), downloads, 2).apply(&plan).await.unwrap();

    assert_eq!((report.succeeded(), report.failed()), (3, 0));
    assert_eq!(std::fs::read(temp.path().join("a.py")).unwrap(), b"new-a");
    assert_eq!(std::fs::read(temp.path().join("pkg/b.py")).unwrap(), b"new-b");
    assert!(!temp.path().join("stale").exists());
    assert!(!temp.path().join("_temp_update").exists());
    assert_eq!(report.hot_reloadable(), vec!["a.py"]);
    assert_eq!(report.restart_tier(), RestartClass::Soft);
  }

  #[tokio::test]
  async fn applying_then_rescanning_yields_empty_plan() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a.py", b"1");
    write_file(temp.path(), "b.py", b"2");
    write_file(temp.path(), "gone.py", b"3");

    let m = manifest(
      "2.0.0",
      &[
        ("a.py", b"1", RestartClass::None),
        ("b.py", b"22", RestartClass::None),
        ("c/d.json", b"4", RestartClass::None),
      ],
      "http://unused.invalid",
    );
    let plan = plan_for(temp.path(), &m);
    let downloads = offline_downloads(&temp.path().join("_update_cache"), &[("b.py", b"22"), ("c/d.json", b"4")]);

    ApplyEngine::new(temp.path(), downloads, 4).apply(&plan).await.unwrap();

    assert!(plan_for(temp.path(), &m).is_empty());
  }

  #[tokio::test]
  async fn failed_download_leaves_previous_content() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "a.py", b"old-a");
    write_file(temp.path(), "c.py", b"old-c");

    let m = manifest(
      "1.1.0",
      &[("a.py", b"new-a", RestartClass::None), ("c.py", b"new-c", RestartClass::None)],
      "http://unused.invalid",
    );
    let plan = plan_for(temp.path(), &m);
    // c.py is served with the wrong bytes.
    let downloads = offline_downloads(&temp.path().join("_update_cache"), &[("a.py", b"new-a"), ("c.py", b"evil")]);

    let report = ApplyEngine::new(temp.path(), downloads, 2).apply(&plan).await.unwrap();

    assert_eq!((report.succeeded(), report.failed()), (1, 1));
    assert_eq!(report.failures().next().unwrap().path(), "c.py");
    assert_eq!(std::fs::read(temp.path().join("c.py")).unwrap(), b"old-c");
  }

  #[tokio::test]
  async fn scenario_e_locked_file_is_deferred_and_swapped_at_next_start() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "main.py", b"old-main");
    write_file(temp.path(), "util.py", b"old-util");

    let m = manifest(
      "1.1.0",
      &[("main.py", b"new-main", RestartClass::None), ("util.py", b"new-util", RestartClass::None)],
      "http://unused.invalid",
    );
    let plan = plan_for(temp.path(), &m);
    let downloads = offline_downloads(
      &temp.path().join("_update_cache"),
      &[("main.py", b"new-main"), ("util.py", b"new-util")],
    );
    let swap = Arc::new(LockingSwap {
      locked: HashSet::from(["main.py".to_string()]),
    });

    let report = ApplyEngine::new(temp.path(), downloads, 2)
      .with_swap(swap)
      .apply(&plan)
      .await
      .unwrap();

    assert_eq!((report.succeeded(), report.failed()), (2, 0));
    assert_eq!(report.deferred(), vec!["main.py"]);
    assert_eq!(report.restart_tier(), RestartClass::Soft);
    assert_eq!(report.hot_reloadable(), vec!["util.py"]);
    assert_eq!(std::fs::read(temp.path().join("main.py")).unwrap(), b"old-main");

    let pending = PendingReplacements::load(temp.path()).unwrap().unwrap();
    assert_eq!(pending.swaps, vec![PendingSwap::for_path("main.py")]);

    // Next process start.
    let finished = apply_pending(temp.path()).unwrap();
    assert_eq!(finished.applied, vec!["main.py".to_string()]);
    assert_eq!(std::fs::read(temp.path().join("main.py")).unwrap(), b"new-main");
    assert!(!pending_path(temp.path()).exists());
  }

  #[tokio::test]
  async fn locked_delete_counts_as_failure() {
    struct NoDelete;
    impl FileSwap for NoDelete {
      fn remove(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
      }
      fn replace(&self, staged: &Path, dest: &Path) -> io::Result<()> {
        RenameSwap.replace(staged, dest)
      }
    }

    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "old.py", b"x");
    let m = manifest("1.0.0", &[], "http://unused.invalid");
    let plan = plan_for(temp.path(), &m);

    let report = ApplyEngine::new(temp.path(), offline_downloads(&temp.path().join("cache"), &[]), 1)
      .with_swap(Arc::new(NoDelete))
      .apply(&plan)
      .await
      .unwrap();

    assert_eq!((report.succeeded(), report.failed()), (0, 1));
    assert!(temp.path().join("old.py").exists());
  }

  #[test]
  fn lock_detection() {
    assert!(is_locked(&io::Error::from(io::ErrorKind::PermissionDenied)));
    assert!(is_locked(&io::Error::from(io::ErrorKind::ResourceBusy)));
    assert!(!is_locked(&io::Error::from(io::ErrorKind::NotFound)));
  }
}
