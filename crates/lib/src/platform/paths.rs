//! Where upkeep keeps things.
//!
//! Two families of paths: per-user config (outside any install) and the
//! engine-owned entries inside an install root. Everything under the root
//! goes through the helpers here so the names in [`crate::consts`] have a
//! single point of use.

use std::env;
use std::path::{Path, PathBuf};

use crate::consts::{
  APP_NAME, BACKUP_DIR, CACHE_DIR, CONFIG_FILENAME, LOCK_FILENAME, PENDING_DIR, PENDING_FILENAME, STAGING_DIR,
  VERSION_FILENAME,
};

fn env_dir(var: &str) -> Option<PathBuf> {
  env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Per-user config directory: `%APPDATA%\upkeep` on Windows,
/// `$XDG_CONFIG_HOME/upkeep` (or `~/.config/upkeep`) elsewhere.
pub fn config_dir() -> PathBuf {
  let base = if cfg!(windows) {
    env_dir("APPDATA").or_else(|| env_dir("USERPROFILE").map(|home| home.join("AppData").join("Roaming")))
  } else {
    env_dir("XDG_CONFIG_HOME").or_else(|| env_dir("HOME").map(|home| home.join(".config")))
  };
  base.unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME)
}

/// Directory containing the running executable; the default install root.
pub fn current_exe_dir() -> PathBuf {
  env::current_exe()
    .ok()
    .and_then(|exe| exe.parent().map(Path::to_path_buf))
    .unwrap_or_else(|| PathBuf::from("."))
}

pub fn root_config_file(install_root: &Path) -> PathBuf {
  install_root.join(CONFIG_FILENAME)
}

pub fn backup_dir(install_root: &Path) -> PathBuf {
  install_root.join(BACKUP_DIR)
}

pub fn staging_dir(install_root: &Path) -> PathBuf {
  install_root.join(STAGING_DIR)
}

pub fn cache_dir(install_root: &Path) -> PathBuf {
  install_root.join(CACHE_DIR)
}

/// Staged files waiting for a deferred swap.
pub fn pending_dir(install_root: &Path) -> PathBuf {
  install_root.join(PENDING_DIR)
}

pub fn pending_file(install_root: &Path) -> PathBuf {
  install_root.join(PENDING_FILENAME)
}

pub fn version_file(install_root: &Path) -> PathBuf {
  install_root.join(VERSION_FILENAME)
}

pub fn lock_file(install_root: &Path) -> PathBuf {
  install_root.join(LOCK_FILENAME)
}
