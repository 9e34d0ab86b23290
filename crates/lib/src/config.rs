//! Updater configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.
//!
//! # Lookup order
//!
//! 1. Explicit path, if given (must exist)
//! 2. `<install_root>/upkeep.toml`
//! 3. `<config_dir>/upkeep/config.toml`
//!
//! `UPKEEP_INSTALL_ROOT` and `UPKEEP_MANIFEST_URL` override the file.
//!
//! # Example
//!
//! ```toml
//! parallelism = 2
//!
//! [repository]
//! owner = "acme"
//! repo = "desktop-app"
//! branch = "main"
//!
//! [classification]
//! hard = [".exe", ".dll"]
//! soft = ["main.py"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{
  APP_NAME, CONFIG_FILENAME, DEFAULT_BACKUP_RETENTION, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MANIFEST_TIMEOUT_SECS,
  DEFAULT_PARALLELISM, MANIFEST_PATH, UPDATER_EXE,
};
use crate::manifest::ClassificationTable;
use crate::platform::paths::{config_dir, current_exe_dir, root_config_file};
use crate::snapshot::ProtectedPaths;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
}

/// Where the release tree is published.
///
/// The same coordinates drive the default file URLs and the mirror and
/// content-API fallbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryCoordinates {
  pub owner: String,
  pub repo: String,
  pub branch: String,
  pub raw_base: String,
  pub mirror_base: String,
  pub api_base: String,
}

impl Default for RepositoryCoordinates {
  fn default() -> Self {
    Self {
      owner: String::new(),
      repo: String::new(),
      branch: "main".to_string(),
      raw_base: "https://raw.githubusercontent.com".to_string(),
      mirror_base: "https://cdn.jsdelivr.net".to_string(),
      api_base: "https://api.github.com".to_string(),
    }
  }
}

impl RepositoryCoordinates {
  /// True if owner and repository are both set.
  pub fn is_configured(&self) -> bool {
    !self.owner.is_empty() && !self.repo.is_empty()
  }

  /// Direct URL of a file in the published tree.
  pub fn raw_url(&self, path: &str) -> String {
    format!(
      "{}/{}/{}/{}/{}",
      self.raw_base.trim_end_matches('/'),
      self.owner,
      self.repo,
      self.branch,
      url_path(path)
    )
  }

  /// CDN mirror URL of a file in the published tree.
  pub fn mirror_url(&self, path: &str) -> String {
    format!(
      "{}/gh/{}/{}@{}/{}",
      self.mirror_base.trim_end_matches('/'),
      self.owner,
      self.repo,
      self.branch,
      url_path(path)
    )
  }

  /// Content-API URL of a file in the published tree.
  pub fn content_api_url(&self, path: &str) -> String {
    format!(
      "{}/repos/{}/{}/contents/{}?ref={}",
      self.api_base.trim_end_matches('/'),
      self.owner,
      self.repo,
      url_path(path),
      self.branch
    )
  }
}

fn url_path(path: &str) -> String {
  path.replace('\\', "/").trim_start_matches('/').replace(' ', "%20")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
  /// Tree being updated. Defaults to the directory of the running executable.
  pub install_root: Option<PathBuf>,
  /// Manifest endpoint. Defaults to the manifest path under the repository.
  pub manifest_url: Option<String>,
  pub repository: RepositoryCoordinates,
  pub manifest_timeout_secs: u64,
  pub download_timeout_secs: u64,
  /// Download worker pool size.
  pub parallelism: usize,
  pub backup_retention: usize,
  /// Extra names never scanned or deleted. The engine's files and the
  /// updater's own config and executable are always protected.
  pub protected: Vec<String>,
  pub classification: ClassificationTable,
}

impl Default for UpdaterConfig {
  fn default() -> Self {
    Self {
      install_root: None,
      manifest_url: None,
      repository: RepositoryCoordinates::default(),
      manifest_timeout_secs: DEFAULT_MANIFEST_TIMEOUT_SECS,
      download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
      parallelism: DEFAULT_PARALLELISM,
      backup_retention: DEFAULT_BACKUP_RETENTION,
      protected: Vec::new(),
      classification: ClassificationTable::default(),
    }
  }
}

impl UpdaterConfig {
  /// Load configuration following the lookup order, then apply env overrides.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    let mut config = match explicit {
      Some(path) => {
        if !path.exists() {
          return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::from_file(path)?
      }
      None => {
        let root = std::env::var("UPKEEP_INSTALL_ROOT")
          .map(PathBuf::from)
          .unwrap_or_else(|_| current_exe_dir());
        let candidates = [root_config_file(&root), config_dir().join("config.toml")];
        match candidates.iter().find(|p| p.exists()) {
          Some(path) => Self::from_file(path)?,
          None => {
            debug!("no config file found, using defaults");
            Self::default()
          }
        }
      }
    };

    config.apply_env_overrides();
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
  }

  pub fn apply_env_overrides(&mut self) {
    if let Ok(root) = std::env::var("UPKEEP_INSTALL_ROOT") {
      self.install_root = Some(PathBuf::from(root));
    }
    if let Ok(url) = std::env::var("UPKEEP_MANIFEST_URL") {
      self.manifest_url = Some(url);
    }
  }

  pub fn install_root(&self) -> PathBuf {
    self.install_root.clone().unwrap_or_else(current_exe_dir)
  }

  pub fn manifest_url(&self) -> String {
    self
      .manifest_url
      .clone()
      .unwrap_or_else(|| self.repository.raw_url(MANIFEST_PATH))
  }

  pub fn manifest_timeout(&self) -> Duration {
    Duration::from_secs(self.manifest_timeout_secs)
  }

  pub fn download_timeout(&self) -> Duration {
    Duration::from_secs(self.download_timeout_secs)
  }

  pub fn protected_paths(&self) -> ProtectedPaths {
    let own = [CONFIG_FILENAME, APP_NAME, UPDATER_EXE].map(str::to_string);
    ProtectedPaths::with_extra(own.into_iter().chain(self.protected.iter().cloned()))
  }
}
