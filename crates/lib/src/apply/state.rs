//! Installed version record (`_version.json`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::platform::paths::version_file;
use crate::util::fs::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
  pub version: String,
  /// RFC 3339 timestamp of the update.
  pub updated: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub update_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,
}

impl VersionRecord {
  pub fn new(version: &str, update_id: Option<String>, branch: Option<String>) -> Self {
    Self {
      version: version.to_string(),
      updated: chrono::Utc::now().to_rfc3339(),
      update_id,
      branch,
    }
  }

  pub fn path(install_root: &Path) -> PathBuf {
    version_file(install_root)
  }

  pub fn load(install_root: &Path) -> io::Result<Option<Self>> {
    match fs::read_to_string(Self::path(install_root)) {
      Ok(content) => serde_json::from_str(&content).map(Some).map_err(io::Error::other),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e),
    }
  }

  pub fn save(&self, install_root: &Path) -> io::Result<()> {
    let content = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
    write_atomic(&Self::path(install_root), content.as_bytes())
  }
}
