//! In-process module registry and hot-reload coordination.
//!
//! The host registers every reloadable unit of code under a name, together
//! with the file that implements it and a [`ModuleLoader`] able to produce a
//! fresh handle from that file. After an update replaces a file classified
//! as hot-reloadable, the coordinator asks the registry to reload the
//! matching module and, if the module was registered with
//! `reinitialize = true`, calls the host's re-initialization hook.
//!
//! Handles are `Arc<dyn Any>` so the registry never needs to know concrete
//! module types; callers downcast with [`ModuleRegistry::get_as`].

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Current implementation of a module.
pub type ModuleHandle = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum ReloadError {
  #[error("module '{0}' is not registered")]
  UnknownModule(String),

  #[error("failed to reload module '{module}': {source}")]
  Load {
    module: String,
    #[source]
    source: BoxError,
  },

  #[error("failed to re-initialize module '{module}': {source}")]
  Reinitialize {
    module: String,
    #[source]
    source: BoxError,
  },

  #[error("module registry lock poisoned")]
  Poisoned,
}

/// Produces a module handle from its file.
pub trait ModuleLoader: Send + Sync {
  fn load(&self, install_root: &Path, file: &str) -> Result<ModuleHandle, BoxError>;
}

impl<F> ModuleLoader for F
where
  F: Fn(&Path, &str) -> Result<ModuleHandle, BoxError> + Send + Sync,
{
  fn load(&self, install_root: &Path, file: &str) -> Result<ModuleHandle, BoxError> {
    self(install_root, file)
  }
}

struct RegisteredModule {
  file: String,
  handle: ModuleHandle,
  loader: Arc<dyn ModuleLoader>,
  reinitialize: bool,
  generation: u64,
}

/// Module name for a relative file path: extension dropped, separators
/// turned into dots (`providers/llm_client.py` is `providers.llm_client`).
pub fn module_name(path: &str) -> String {
  let normalized = path.replace('\\', "/");
  let stem = match normalized.rsplit_once('.') {
    Some((stem, _ext)) if !stem.is_empty() && !stem.ends_with('/') => stem.to_string(),
    _ => normalized.clone(),
  };
  stem.trim_start_matches("./").replace('/', ".")
}

#[derive(Default)]
pub struct ModuleRegistry {
  modules: RwLock<BTreeMap<String, RegisteredModule>>,
}

impl std::fmt::Debug for ModuleRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleRegistry").field("modules", &self.names()).finish()
  }
}

impl ModuleRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or re-register) `name`, implemented by `file`.
  pub fn register(
    &self,
    name: impl Into<String>,
    file: impl Into<String>,
    handle: ModuleHandle,
    loader: Arc<dyn ModuleLoader>,
    reinitialize: bool,
  ) -> Result<(), ReloadError> {
    let name = name.into();
    let file = file.into().replace('\\', "/");
    debug!(module = %name, file = %file, reinitialize, "module registered");

    let mut modules = self.modules.write().map_err(|_| ReloadError::Poisoned)?;
    modules.insert(
      name,
      RegisteredModule {
        file,
        handle,
        loader,
        reinitialize,
        generation: 0,
      },
    );
    Ok(())
  }

  pub fn names(&self) -> Vec<String> {
    self
      .modules
      .read()
      .map(|m| m.keys().cloned().collect())
      .unwrap_or_default()
  }

  pub fn get(&self, name: &str) -> Option<ModuleHandle> {
    self.modules.read().ok()?.get(name).map(|m| m.handle.clone())
  }

  /// Current handle downcast to `T`.
  pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
    self.get(name)?.downcast::<T>().ok()
  }

  /// How many times `name` has been reloaded.
  pub fn generation(&self, name: &str) -> Option<u64> {
    self.modules.read().ok()?.get(name).map(|m| m.generation)
  }

  /// Module implemented by `file`, matched on the registered file first and
  /// the derived module name second.
  pub fn module_for_file(&self, file: &str) -> Option<String> {
    let file = file.replace('\\', "/");
    let modules = self.modules.read().ok()?;
    if let Some((name, _)) = modules.iter().find(|(_, m)| m.file == file) {
      return Some(name.clone());
    }
    let derived = module_name(&file);
    modules.contains_key(&derived).then_some(derived)
  }

  /// Load a fresh handle for `name` and swap it in.
  ///
  /// The old handle stays in place if loading fails. Returns whether the
  /// module asked to be re-initialized.
  pub fn reload(&self, name: &str, install_root: &Path) -> Result<bool, ReloadError> {
    let (file, loader, reinitialize) = {
      let modules = self.modules.read().map_err(|_| ReloadError::Poisoned)?;
      let module = modules
        .get(name)
        .ok_or_else(|| ReloadError::UnknownModule(name.to_string()))?;
      (module.file.clone(), module.loader.clone(), module.reinitialize)
    };

    let handle = loader.load(install_root, &file).map_err(|source| ReloadError::Load {
      module: name.to_string(),
      source,
    })?;

    let mut modules = self.modules.write().map_err(|_| ReloadError::Poisoned)?;
    let module = modules
      .get_mut(name)
      .ok_or_else(|| ReloadError::UnknownModule(name.to_string()))?;
    module.handle = handle;
    module.generation += 1;

    debug!(module = %name, generation = module.generation, "module reloaded");
    Ok(reinitialize)
  }
}

/// Outcome of reloading the hot-reloadable files of one apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
  /// Modules reloaded in place.
  pub reloaded: Vec<String>,
  /// Files with no registered module; nothing in memory to refresh.
  pub unregistered: Vec<String>,
  /// Files whose reload failed, with the reason. Each needs a soft restart.
  pub escalated: Vec<(String, String)>,
}

impl ReloadReport {
  pub fn needs_restart(&self) -> bool {
    !self.escalated.is_empty()
  }
}

pub struct HotReloadCoordinator<'a> {
  registry: &'a ModuleRegistry,
  install_root: PathBuf,
}

impl<'a> HotReloadCoordinator<'a> {
  pub fn new(registry: &'a ModuleRegistry, install_root: impl Into<PathBuf>) -> Self {
    Self {
      registry,
      install_root: install_root.into(),
    }
  }

  /// Reload the module behind each file, then run its re-initialization
  /// hook if it declared one. One failure never stops the others.
  pub fn reload_files<S: AsRef<str>>(
    &self,
    files: &[S],
    reinitialize: &dyn Fn(&str) -> Result<(), BoxError>,
  ) -> ReloadReport {
    let mut report = ReloadReport::default();

    for file in files {
      let file = file.as_ref();
      let Some(module) = self.registry.module_for_file(file) else {
        debug!(file, "no registered module");
        report.unregistered.push(file.to_string());
        continue;
      };

      let result = self.registry.reload(&module, &self.install_root).and_then(|needs_init| {
        if needs_init {
          reinitialize(&module).map_err(|source| ReloadError::Reinitialize {
            module: module.clone(),
            source,
          })?;
        }
        Ok(())
      });

      match result {
        Ok(()) => report.reloaded.push(module),
        Err(e) => {
          warn!(file, module = %module, error = %e, "hot reload failed, restart required");
          report.escalated.push((file.to_string(), e.to_string()));
        }
      }
    }

    info!(
      reloaded = report.reloaded.len(),
      escalated = report.escalated.len(),
      "hot reload complete"
    );
    report
  }
}
