//! Names and defaults shared across the engine.

/// Application name used for platform directories.
pub const APP_NAME: &str = "upkeep";

/// Directory (inside the install root) holding backup archives.
pub const BACKUP_DIR: &str = "_backups";

/// Directory (inside the install root) used to stage downloads during apply.
pub const STAGING_DIR: &str = "_temp_update";

/// Directory (inside the install root) holding the content-addressed cache.
pub const CACHE_DIR: &str = "_update_cache";

/// Directory (inside the install root) holding staged files awaiting a deferred swap.
pub const PENDING_DIR: &str = "_pending";

/// Instruction file listing deferred swaps, consumed at next start.
pub const PENDING_FILENAME: &str = "_pending_replacements.json";

/// Version record written after every successful apply.
pub const VERSION_FILENAME: &str = "_version.json";

/// Advisory lock file guarding the install tree across processes.
pub const LOCK_FILENAME: &str = "_update.lock";

/// Config file looked up in the install root.
pub const CONFIG_FILENAME: &str = "upkeep.toml";

/// Windows name of the updater binary; the unix name is [`APP_NAME`].
pub const UPDATER_EXE: &str = "upkeep.exe";

/// Number of backups retained after a successful backup.
pub const DEFAULT_BACKUP_RETENTION: usize = 3;

/// Timeout for the manifest request.
pub const DEFAULT_MANIFEST_TIMEOUT_SECS: u64 = 5;

/// Timeout for each download attempt.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Size of the download worker pool.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Path of the manifest inside the published repository.
pub const MANIFEST_PATH: &str = "update_system/manifest.json";

/// Every engine-owned name. Paths with any of these as a component are never
/// scanned, backed up or deleted.
pub const ENGINE_OWNED: &[&str] = &[
  BACKUP_DIR,
  STAGING_DIR,
  CACHE_DIR,
  PENDING_DIR,
  PENDING_FILENAME,
  VERSION_FILENAME,
  LOCK_FILENAME,
];
