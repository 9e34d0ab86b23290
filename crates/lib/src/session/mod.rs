//! Update session: the state machine driving one check/apply cycle.
//!
//! One `UpdateSession` lives for the whole process. It is shared by
//! reference (`Arc`) with whoever triggers checks, and it rejects a new cycle
//! while one is running instead of queueing it. While a cycle mutates the
//! tree it also holds the cross-process [`InstallLock`].

mod host;
mod state;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{error, info, warn};

pub use host::{OutcomeKind, ProgressEvent, UpdateAvailability, UpdateHost, UpdateOutcome};
pub use state::SessionState;

use crate::apply::{ApplyEngine, ApplyError, FileSwap, PendingError, PendingReport, RenameSwap, VersionRecord, apply_pending};
use crate::backup::{Backup, BackupError, BackupStore};
use crate::config::UpdaterConfig;
use crate::platform::paths::cache_dir;
use crate::download::{ContentCache, DownloadError, DownloadManager};
use crate::install_lock::{InstallLock, InstallLockError};
use crate::manifest::{
  Manifest, ManifestFetcher, RestartClass, VersionChange, below_minimum, compare_versions,
};
use crate::reload::{HotReloadCoordinator, ModuleRegistry, ReloadReport};
use crate::snapshot::{ProtectedPaths, UpdatePlan, build_snapshot_async, compute_plan};

#[derive(Debug, Error)]
pub enum SessionError {
  #[error("an update cycle is already running (state: {0})")]
  Busy(SessionState),

  #[error(transparent)]
  Locked(#[from] InstallLockError),

  #[error("failed to set up downloads: {0}")]
  Setup(#[from] DownloadError),

  #[error("failed to build manifest client: {0}")]
  Client(#[from] reqwest::Error),

  #[error("failed to finish deferred swaps: {0}")]
  Pending(#[from] PendingError),
}

#[derive(Debug, Default)]
struct Status {
  state: SessionState,
  plan: Option<UpdatePlan>,
  last_outcome: Option<UpdateOutcome>,
}

pub struct UpdateSession {
  root: PathBuf,
  config: UpdaterConfig,
  host: Arc<dyn UpdateHost>,
  registry: Arc<ModuleRegistry>,
  fetcher: ManifestFetcher,
  downloads: DownloadManager,
  swap: Arc<dyn FileSwap>,
  backups: BackupStore,
  protected: ProtectedPaths,
  status: Mutex<Status>,
}

impl std::fmt::Debug for UpdateSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("UpdateSession")
      .field("root", &self.root)
      .field("manifest_url", &self.fetcher.url())
      .field("state", &self.state())
      .finish()
  }
}

impl UpdateSession {
  pub fn new(
    config: UpdaterConfig,
    host: Arc<dyn UpdateHost>,
    registry: Arc<ModuleRegistry>,
  ) -> Result<Self, SessionError> {
    let root = config.install_root();
    let fetcher = ManifestFetcher::new(
      config.manifest_url(),
      config.manifest_timeout(),
      config.classification.clone(),
      config.repository.clone(),
    )?;
    let downloads = DownloadManager::new(
      &config.repository,
      ContentCache::new(cache_dir(&root)),
      config.download_timeout(),
    )?;

    Ok(Self {
      backups: BackupStore::new(&root, config.backup_retention),
      protected: config.protected_paths(),
      root,
      config,
      host,
      registry,
      fetcher,
      downloads,
      swap: Arc::new(RenameSwap),
      status: Mutex::new(Status::default()),
    })
  }

  pub fn with_downloads(mut self, downloads: DownloadManager) -> Self {
    self.downloads = downloads;
    self
  }

  pub fn with_swap(mut self, swap: Arc<dyn FileSwap>) -> Self {
    self.swap = swap;
    self
  }

  pub fn install_root(&self) -> &Path {
    &self.root
  }

  pub fn state(&self) -> SessionState {
    self.status.lock().map(|s| s.state).unwrap_or(SessionState::Failed)
  }

  /// Plan of the current or last cycle.
  pub fn plan(&self) -> Option<UpdatePlan> {
    self.status.lock().ok()?.plan.clone()
  }

  pub fn last_outcome(&self) -> Option<UpdateOutcome> {
    self.status.lock().ok()?.last_outcome.clone()
  }

  /// Swap in files deferred by an earlier run. Call before anything opens them.
  /// Holds the install lock so a concurrent apply cannot record swaps while
  /// the instruction file is rewritten.
  pub fn apply_pending(&self) -> Result<PendingReport, SessionError> {
    let _lock = InstallLock::acquire(&self.root, "finish-pending")?;
    Ok(apply_pending(&self.root)?)
  }

  pub fn backups(&self) -> &BackupStore {
    &self.backups
  }

  /// Fetch the manifest and report whether an update is available.
  pub async fn check_for_update(&self) -> Result<UpdateAvailability, SessionError> {
    self.begin()?;

    let current = self.host.current_version();
    let availability = match self.fetcher.fetch().await {
      Ok(manifest) => self.assess(&manifest, &current),
      Err(e) => {
        warn!(error = %e, "update check failed");
        UpdateAvailability::Unavailable { reason: e.to_string() }
      }
    };

    self.transition(SessionState::Idle);
    Ok(availability)
  }

  /// Run a full cycle. Without `auto_apply`, a non-forced update is only
  /// reported as available.
  ///
  /// Returns `Err` only when the cycle could not start; every other result,
  /// including failures, is a definitive [`UpdateOutcome`].
  pub async fn apply_update(&self, auto_apply: bool) -> Result<UpdateOutcome, SessionError> {
    self.begin()?;

    let lock = match InstallLock::acquire(&self.root, "apply") {
      Ok(lock) => lock,
      Err(e) => {
        self.transition(SessionState::Idle);
        return Err(e.into());
      }
    };

    let outcome = self.run_cycle(auto_apply).await;
    drop(lock);

    self.host.notify(&outcome.message);
    if let Ok(mut status) = self.status.lock() {
      status.last_outcome = Some(outcome.clone());
    }
    Ok(outcome)
  }

  fn begin(&self) -> Result<(), SessionError> {
    let from = {
      let mut status = self.status.lock().map_err(|_| SessionError::Busy(SessionState::Failed))?;
      if !status.state.can_start() {
        return Err(SessionError::Busy(status.state));
      }
      let from = status.state;
      status.state = SessionState::Checking;
      status.plan = None;
      from
    };
    self.host.progress(&ProgressEvent::State {
      from,
      to: SessionState::Checking,
    });
    Ok(())
  }

  fn transition(&self, to: SessionState) {
    let from = match self.status.lock() {
      Ok(mut status) => {
        let from = status.state;
        if !from.can_transition_to(to) {
          error!(%from, %to, "invalid session transition");
        }
        status.state = to;
        from
      }
      Err(_) => return,
    };
    info!(%from, %to, "session state");
    self.host.progress(&ProgressEvent::State { from, to });
  }

  fn assess(&self, manifest: &Manifest, current: &str) -> UpdateAvailability {
    let change = compare_versions(current, &manifest.version);
    let forced = manifest.force_update
      || manifest
        .minimum_version
        .as_deref()
        .is_some_and(|minimum| below_minimum(current, minimum));

    if change == VersionChange::Same && !forced {
      return UpdateAvailability::UpToDate {
        version: current.to_string(),
      };
    }

    UpdateAvailability::Available {
      current: current.to_string(),
      version: manifest.version.clone(),
      change,
      forced,
      update_id: manifest.update_id.clone(),
      changelog: manifest.changelog.clone(),
    }
  }

  async fn run_cycle(&self, auto_apply: bool) -> UpdateOutcome {
    let current = self.host.current_version();

    let manifest = match self.fetcher.fetch().await {
      Ok(manifest) => manifest,
      Err(e) => {
        self.transition(SessionState::Idle);
        return UpdateOutcome::simple(
          OutcomeKind::CheckFailed,
          format!("update check failed, try later: {e}"),
          None,
        );
      }
    };
    let version = Some(manifest.version.clone());

    let forced = match self.assess(&manifest, &current) {
      UpdateAvailability::Available { forced, .. } => forced,
      _ => {
        self.transition(SessionState::Idle);
        return UpdateOutcome::simple(
          OutcomeKind::UpToDate,
          format!("already on latest version ({current})"),
          version,
        );
      }
    };

    if !auto_apply && !forced {
      self.transition(SessionState::Idle);
      return UpdateOutcome::simple(
        OutcomeKind::Available,
        format!("update {} available", manifest.version),
        version,
      );
    }

    let snapshot = match build_snapshot_async(&self.root, &self.protected).await {
      Ok(snapshot) => snapshot,
      Err(e) => {
        self.transition(SessionState::Failed);
        return UpdateOutcome::simple(OutcomeKind::Failed, format!("could not scan install: {e}"), version);
      }
    };

    let plan = compute_plan(&snapshot, &manifest, &self.protected);
    if let Ok(mut status) = self.status.lock() {
      status.plan = Some(plan.clone());
    }
    self.transition(SessionState::PlanReady);

    if plan.is_empty() {
      self.record_version(&manifest);
      self.transition(SessionState::Succeeded);
      return UpdateOutcome::simple(
        OutcomeKind::Applied,
        format!("update applied, 0 files updated, 0 failed ({})", manifest.version),
        version,
      );
    }

    info!(
      add = plan.add.len(),
      update = plan.update.len(),
      delete = plan.delete.len(),
      tier = %plan.restart_tier,
      "update plan ready"
    );

    let backup = match self.create_backup(snapshot, &current).await {
      Ok(backup) => backup,
      Err(e) => {
        error!(error = %e, "backup failed, aborting before any change");
        self.transition(SessionState::Failed);
        return UpdateOutcome::simple(OutcomeKind::Failed, format!("backup failed, no changes made: {e}"), version);
      }
    };

    self.transition(SessionState::Downloading);
    let engine = ApplyEngine::new(&self.root, self.downloads.clone(), self.config.parallelism)
      .with_swap(self.swap.clone());

    let total = plan.add.len() + plan.update.len();
    let staged = engine
      .stage(&plan, |completed, entry, ok| {
        self.host.progress(&ProgressEvent::Download {
          completed,
          total,
          path: entry.path.clone(),
          ok,
        });
      })
      .await;

    let staged = match staged {
      Ok(staged) => staged,
      Err(e) => {
        error!(error = %e, "staging failed, no changes made");
        engine.cleanup_staging();
        self.transition(SessionState::Failed);
        return UpdateOutcome::simple(OutcomeKind::Failed, format!("update failed, no changes made: {e}"), version);
      }
    };

    self.transition(SessionState::Applying);
    let committed = {
      let engine = engine.clone();
      let plan = plan.clone();
      let host = self.host.clone();
      tokio::task::spawn_blocking(move || {
        let total = plan.len();
        let mut completed = 0;
        engine.commit(&plan, staged, |outcome| {
          completed += 1;
          host.progress(&ProgressEvent::Apply {
            completed,
            total,
            path: outcome.path().to_string(),
            ok: !outcome.is_failure(),
          });
        })
      })
      .await
      .unwrap_or_else(|e| Err(ApplyError::Interrupted(e.to_string())))
    };

    let report = match committed {
      Ok(report) => report,
      Err(e) => {
        engine.cleanup_staging();
        return self.roll_back(&backup, e, version).await;
      }
    };

    let hot: Vec<String> = report.hot_reloadable().into_iter().map(String::from).collect();
    let reload = {
      let registry = self.registry.clone();
      let root = self.root.clone();
      let host = self.host.clone();
      let files = hot.clone();
      tokio::task::spawn_blocking(move || {
        HotReloadCoordinator::new(&registry, root).reload_files(&files, &|module: &str| host.reinitialize(module))
      })
      .await
      .unwrap_or_else(|e| {
        warn!(error = %e, "hot reload task failed");
        ReloadReport {
          escalated: hot.into_iter().map(|file| (file, e.to_string())).collect(),
          ..Default::default()
        }
      })
    };

    let mut tier = report.restart_tier();
    if reload.needs_restart() {
      tier = tier.max(RestartClass::Soft);
    }

    let succeeded = report.succeeded();
    let failed = report.failed();

    let (kind, message) = if failed == 0 {
      self.record_version(&manifest);
      self.transition(SessionState::Succeeded);
      (
        OutcomeKind::Applied,
        format!("update applied, {succeeded} files updated, 0 failed"),
      )
    } else {
      self.transition(SessionState::PartialFailure);
      (
        OutcomeKind::PartiallyApplied,
        format!("update applied with {failed} failures, see log"),
      )
    };

    UpdateOutcome {
      kind,
      success: kind == OutcomeKind::Applied,
      message: if tier.requires_restart() {
        format!("{message}; {tier} restart required")
      } else {
        message
      },
      restart_required: tier.requires_restart(),
      restart_tier: tier,
      version,
      succeeded,
      failed,
      deferred: report.deferred().into_iter().map(String::from).collect(),
      reloaded: reload.reloaded,
    }
  }

  async fn create_backup(&self, snapshot: crate::snapshot::InstallationSnapshot, current: &str) -> Result<Backup, BackupError> {
    let store = self.backups.clone();
    let current = current.to_string();
    let report = tokio::task::spawn_blocking(move || store.create(&snapshot, &current))
      .await
      .map_err(|e| BackupError::Write {
        path: self.backups.dir().to_path_buf(),
        source: std::io::Error::other(e),
      })??;
    Ok(report.backup)
  }

  async fn roll_back(&self, backup: &Backup, cause: ApplyError, version: Option<String>) -> UpdateOutcome {
    error!(error = %cause, backup = %backup.name, "apply failed, rolling back");
    self.transition(SessionState::Failed);
    self.transition(SessionState::RollingBack);

    let store = self.backups.clone();
    let target = backup.clone();
    let restored = tokio::task::spawn_blocking(move || store.restore(&target)).await;

    match restored {
      Ok(Ok(report)) => {
        info!(restored = report.restored, "rollback complete");
        self.transition(SessionState::Idle);
        UpdateOutcome::simple(
          OutcomeKind::RolledBack,
          format!("update failed and was rolled back: {cause}"),
          version,
        )
      }
      Ok(Err(e)) => self.rollback_failed(&cause, &e.to_string(), version),
      Err(e) => self.rollback_failed(&cause, &e.to_string(), version),
    }
  }

  fn rollback_failed(&self, cause: &ApplyError, reason: &str, version: Option<String>) -> UpdateOutcome {
    error!(error = %reason, "rollback failed");
    self.transition(SessionState::Failed);
    let mut outcome = UpdateOutcome::simple(
      OutcomeKind::Failed,
      format!("update failed ({cause}) and rollback failed: {reason}"),
      version,
    );
    outcome.restart_required = true;
    outcome.restart_tier = RestartClass::Hard;
    outcome
  }

  fn record_version(&self, manifest: &Manifest) {
    let branch = self
      .config
      .repository
      .is_configured()
      .then(|| self.config.repository.branch.clone());
    let record = VersionRecord::new(&manifest.version, manifest.update_id.clone(), branch);
    if let Err(e) = record.save(&self.root) {
      warn!(error = %e, "failed to write version record");
    }
  }
}
