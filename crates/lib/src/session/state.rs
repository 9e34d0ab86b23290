//! Session lifecycle states.

use std::fmt;

use serde::Serialize;

/// ```text
/// Idle → Checking → PlanReady → Downloading → Applying → Succeeded
///          │            │            │            ├────→ PartialFailure
///          └→ Idle      └→ Idle      └→ Failed    └────→ Failed → RollingBack → Idle
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
  #[default]
  Idle,
  Checking,
  PlanReady,
  Downloading,
  Applying,
  Succeeded,
  PartialFailure,
  Failed,
  RollingBack,
}

impl SessionState {
  pub fn as_str(&self) -> &'static str {
    match self {
      SessionState::Idle => "idle",
      SessionState::Checking => "checking",
      SessionState::PlanReady => "plan_ready",
      SessionState::Downloading => "downloading",
      SessionState::Applying => "applying",
      SessionState::Succeeded => "succeeded",
      SessionState::PartialFailure => "partial_failure",
      SessionState::Failed => "failed",
      SessionState::RollingBack => "rolling_back",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      SessionState::Succeeded | SessionState::PartialFailure | SessionState::Failed
    )
  }

  /// A new cycle may only start from `Idle` or a terminal state.
  pub fn can_start(&self) -> bool {
    *self == SessionState::Idle || self.is_terminal()
  }

  pub fn can_transition_to(&self, next: SessionState) -> bool {
    use SessionState::*;

    match (*self, next) {
      (from, Checking) => from.can_start(),
      (Checking, PlanReady | Idle | Failed) => true,
      (PlanReady, Downloading | Idle | Succeeded | Failed) => true,
      (Downloading, Applying | Failed) => true,
      (Applying, Succeeded | PartialFailure | Failed) => true,
      (Failed, RollingBack) => true,
      (RollingBack, Idle | Failed) => true,
      _ => false,
    }
  }
}

impl fmt::Display for SessionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
