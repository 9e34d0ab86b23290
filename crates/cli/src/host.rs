//! Command-line host for the update session.

use std::path::Path;

use tracing::debug;

use upkeep_lib::apply::VersionRecord;
use upkeep_lib::session::{ProgressEvent, UpdateHost};

use crate::output::{print_info, result_mark};

/// Version reported when the tree has never been updated.
const UNKNOWN_VERSION: &str = "0.0.0";

pub struct CliHost {
  version: String,
  verbose: bool,
  quiet: bool,
}

impl CliHost {
  /// Host for the tree at `install_root`, reading the installed version
  /// from its version record.
  pub fn for_root(install_root: &Path, verbose: bool, quiet: bool) -> Self {
    let version = match VersionRecord::load(install_root) {
      Ok(Some(record)) => record.version,
      Ok(None) => UNKNOWN_VERSION.to_string(),
      Err(e) => {
        debug!(error = %e, "unreadable version record");
        UNKNOWN_VERSION.to_string()
      }
    };
    Self { version, verbose, quiet }
  }
}

impl UpdateHost for CliHost {
  fn current_version(&self) -> String {
    self.version.clone()
  }

  fn notify(&self, message: &str) {
    debug!(message, "session notification");
  }

  fn progress(&self, event: &ProgressEvent) {
    if self.quiet {
      return;
    }
    match event {
      ProgressEvent::State { to, .. } if self.verbose => print_info(&format!("{to}")),
      ProgressEvent::Download {
        completed,
        total,
        path,
        ok,
      } if self.verbose || !ok => {
        println!("  {} [{completed}/{total}] {path}", result_mark(*ok));
      }
      ProgressEvent::Apply { path, ok: false, .. } => {
        println!("  {} {path}", result_mark(false));
      }
      _ => {}
    }
  }
}
