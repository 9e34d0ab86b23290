//! Cross-process lock on an install tree.
//!
//! The active session holds an exclusive advisory lock on
//! `<install_root>/_update.lock` while it checks, downloads and applies, so
//! two processes never mutate one tree. The lock is released on drop.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::paths::lock_file;

/// Written into the lock file by the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  /// RFC 3339 timestamp.
  pub started_at: String,
  pub command: String,
  pub install_root: PathBuf,
}

impl std::fmt::Display for LockMetadata {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "upkeep {} (PID {}, started {})", self.command, self.pid, self.started_at)
  }
}

fn describe_holder(holder: &Option<LockMetadata>) -> String {
  match holder {
    Some(metadata) => metadata.to_string(),
    None => "another process (lock metadata unreadable)".to_string(),
  }
}

#[derive(Debug, Error)]
pub enum InstallLockError {
  #[error(
    "install tree is locked by {}\nIf no upkeep process is running, remove the lock file:\n  {}",
    describe_holder(.holder),
    .lock_path.display()
  )]
  Held {
    holder: Option<LockMetadata>,
    lock_path: PathBuf,
  },

  #[error("failed to open lock file {}: {source}", .path.display())]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// Result of [`InstallLock::peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
  Free,
  Held(Option<LockMetadata>),
}

/// Exclusive hold on an install tree, released on drop.
pub struct InstallLock {
  file: File,
  lock_path: PathBuf,
}

impl std::fmt::Debug for InstallLock {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("InstallLock").field("lock_path", &self.lock_path).finish()
  }
}

impl InstallLock {
  /// Take the exclusive lock for `install_root`, failing fast if held.
  pub fn acquire(install_root: &Path, command: &str) -> Result<Self, InstallLockError> {
    let lock_path = lock_file(install_root);
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(|source| InstallLockError::Open {
        path: lock_path.clone(),
        source,
      })?;

    match try_lock_exclusive(&file) {
      Ok(()) => {}
      Err(err) if is_contention(&err) => {
        return Err(InstallLockError::Held {
          holder: read_holder(&lock_path),
          lock_path,
        });
      }
      Err(err) => return Err(InstallLockError::LockFailed(err)),
    }

    write_metadata(&file, command, install_root)?;
    debug!(path = %lock_path.display(), command, "install lock acquired");
    Ok(InstallLock { file, lock_path })
  }

  /// Report whether another process holds the lock. A tree that has never
  /// been locked is left untouched; otherwise the lock is taken and
  /// released immediately when free.
  pub fn peek(install_root: &Path) -> Result<LockState, InstallLockError> {
    if !lock_file(install_root).exists() {
      return Ok(LockState::Free);
    }
    match Self::acquire(install_root, "status") {
      Ok(_released) => Ok(LockState::Free),
      Err(InstallLockError::Held { holder, .. }) => Ok(LockState::Held(holder)),
      Err(e) => Err(e),
    }
  }

  /// Read the metadata through the held handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

fn write_metadata(file: &File, command: &str, install_root: &Path) -> Result<(), InstallLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at: chrono::Utc::now().to_rfc3339(),
    command: command.to_string(),
    install_root: install_root.to_path_buf(),
  };

  file.set_len(0).map_err(InstallLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata)
    .map_err(|e| InstallLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(InstallLockError::WriteMetadata)
}

fn read_holder(lock_path: &Path) -> Option<LockMetadata> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

fn is_contention(err: &io::Error) -> bool {
  // ERROR_LOCK_VIOLATION
  err.kind() == io::ErrorKind::WouldBlock || (cfg!(windows) && err.raw_os_error() == Some(33))
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(
      handle,
      LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
      0,
      1,
      0,
      &mut overlapped,
    )
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
