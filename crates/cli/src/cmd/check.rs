//! Implementation of the `upkeep check` command.

use std::sync::Arc;

use anyhow::{Result, bail};

use upkeep_lib::session::UpdateAvailability;

use super::{Overrides, open_session, runtime};
use crate::host::CliHost;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, print_warning};

pub fn cmd_check(overrides: &Overrides, output: OutputFormat) -> Result<()> {
  let config = overrides.load_config()?;
  let host = Arc::new(CliHost::for_root(&config.install_root(), false, output.is_json()));
  let session = open_session(config, host)?;

  let availability = runtime()?.block_on(session.check_for_update())?;

  if output.is_json() {
    print_json(&availability)?;
    if let UpdateAvailability::Unavailable { .. } = availability {
      std::process::exit(1);
    }
    return Ok(());
  }

  match availability {
    UpdateAvailability::UpToDate { version } => {
      print_success(&format!("Up to date ({version})"));
    }
    UpdateAvailability::Available {
      current,
      version,
      change,
      forced,
      update_id,
      changelog,
    } => {
      if forced {
        print_warning(&format!("Required update available: {current} → {version}"));
      } else {
        print_info(&format!("Update available: {current} → {version}"));
      }
      print_stat("Change", change.as_str());
      if let Some(id) = update_id {
        print_stat("Update", &id);
      }
      if let Some(changelog) = changelog {
        println!();
        println!("{changelog}");
      }
    }
    UpdateAvailability::Unavailable { reason } => {
      bail!("Update check failed, try later: {reason}");
    }
  }

  Ok(())
}
