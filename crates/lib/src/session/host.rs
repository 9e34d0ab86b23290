//! Boundary with the application embedding the engine.

use serde::Serialize;

use crate::manifest::{RestartClass, VersionChange};
use crate::reload::BoxError;

use super::state::SessionState;

/// Services the embedding application provides to the session.
pub trait UpdateHost: Send + Sync {
  /// Version of the running application.
  fn current_version(&self) -> String;

  /// Status text for the user.
  fn notify(&self, message: &str);

  fn progress(&self, _event: &ProgressEvent) {}

  /// Re-arm a module after it was hot-reloaded (for example, rebuild a
  /// client with the stored credential).
  fn reinitialize(&self, _module: &str) -> Result<(), BoxError> {
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
  State {
    from: SessionState,
    to: SessionState,
  },
  Download {
    completed: usize,
    total: usize,
    path: String,
    ok: bool,
  },
  Apply {
    completed: usize,
    total: usize,
    path: String,
    ok: bool,
  },
}

/// Result of [`super::UpdateSession::check_for_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateAvailability {
  UpToDate {
    version: String,
  },
  Available {
    current: String,
    version: String,
    change: VersionChange,
    /// `force_update` is set or the running version is below `minimum_version`.
    forced: bool,
    update_id: Option<String>,
    changelog: Option<String>,
  },
  /// No usable manifest: network failure or a malformed document.
  Unavailable {
    reason: String,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
  UpToDate,
  /// Update found but not applied.
  Available,
  Applied,
  PartiallyApplied,
  CheckFailed,
  /// Failed before the tree was touched.
  Failed,
  /// Failed while applying; the backup was restored.
  RolledBack,
}

/// Definitive result of [`super::UpdateSession::apply_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
  pub kind: OutcomeKind,
  /// True when an update is available or was applied.
  pub success: bool,
  pub message: String,
  pub restart_required: bool,
  pub restart_tier: RestartClass,
  /// Manifest version, when one was fetched.
  pub version: Option<String>,
  pub succeeded: usize,
  pub failed: usize,
  pub deferred: Vec<String>,
  pub reloaded: Vec<String>,
}

impl UpdateOutcome {
  pub(crate) fn simple(kind: OutcomeKind, message: impl Into<String>, version: Option<String>) -> Self {
    Self {
      kind,
      success: matches!(kind, OutcomeKind::Available | OutcomeKind::Applied),
      message: message.into(),
      restart_required: false,
      restart_tier: RestartClass::None,
      version,
      succeeded: 0,
      failed: 0,
      deferred: Vec::new(),
      reloaded: Vec::new(),
    }
  }
}
