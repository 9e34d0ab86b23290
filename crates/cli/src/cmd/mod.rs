mod apply;
mod backup;
mod check;
mod manifest;
mod pending;
mod plan;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use upkeep_lib::config::UpdaterConfig;
use upkeep_lib::reload::ModuleRegistry;
use upkeep_lib::session::UpdateSession;

use crate::host::CliHost;

pub use apply::cmd_apply;
pub use backup::{BackupCommand, cmd_backup};
pub use check::cmd_check;
pub use manifest::{ManifestCommand, cmd_manifest};
pub use pending::cmd_finish_pending;
pub use plan::cmd_plan;
pub use status::cmd_status;

/// Global flags that override the loaded config.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub config: Option<PathBuf>,
  pub root: Option<PathBuf>,
  pub manifest_url: Option<String>,
}

impl Overrides {
  pub fn load_config(&self) -> Result<UpdaterConfig> {
    let mut config = UpdaterConfig::load(self.config.as_deref()).context("Failed to load config")?;
    if let Some(root) = &self.root {
      config.install_root = Some(dunce::canonicalize(root).unwrap_or_else(|_| root.clone()));
    }
    if let Some(url) = &self.manifest_url {
      config.manifest_url = Some(url.clone());
    }
    Ok(config)
  }
}

/// Session for the CLI: no in-process modules, so nothing hot-reloads.
pub(crate) fn open_session(config: UpdaterConfig, host: Arc<CliHost>) -> Result<UpdateSession> {
  UpdateSession::new(config, host, Arc::new(ModuleRegistry::new())).context("Failed to set up update session")
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
