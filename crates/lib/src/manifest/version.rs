//! Version comparison between the running install and a manifest.
//!
//! Semantic ordering is attempted first. If either side does not parse as a
//! semantic version the comparison falls back to plain string inequality,
//! which tells "different" from "same" but carries no direction.

use std::cmp::Ordering;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionChange {
  Upgrade,
  Downgrade,
  /// Versions differ but at least one is not semantic.
  Different,
  Same,
}

impl VersionChange {
  pub fn as_str(&self) -> &'static str {
    match self {
      VersionChange::Upgrade => "upgrade",
      VersionChange::Downgrade => "downgrade",
      VersionChange::Different => "different",
      VersionChange::Same => "same",
    }
  }

  /// True for every outcome except [`VersionChange::Same`].
  pub fn is_change(&self) -> bool {
    *self != VersionChange::Same
  }
}

/// Parse a version leniently: surrounding whitespace and a leading `v` are ignored.
pub fn parse_version(raw: &str) -> Option<semver::Version> {
  let trimmed = raw.trim();
  let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
  semver::Version::parse(trimmed).ok()
}

/// Compare the installed version with the remote one.
pub fn compare_versions(current: &str, remote: &str) -> VersionChange {
  match (parse_version(current), parse_version(remote)) {
    (Some(current), Some(remote)) => match remote.cmp(&current) {
      Ordering::Greater => VersionChange::Upgrade,
      Ordering::Less => VersionChange::Downgrade,
      Ordering::Equal => VersionChange::Same,
    },
    _ if current.trim() != remote.trim() => VersionChange::Different,
    _ => VersionChange::Same,
  }
}

/// True when `current` is semantically older than `minimum`.
///
/// Unparseable versions never satisfy this, so a malformed minimum cannot
/// force an update.
pub fn below_minimum(current: &str, minimum: &str) -> bool {
  match (parse_version(current), parse_version(minimum)) {
    (Some(current), Some(minimum)) => current < minimum,
    _ => false,
  }
}
