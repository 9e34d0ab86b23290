//! Local state: the installation snapshot and the plan derived from it.

mod diff;
mod scan;
mod types;

pub use diff::{UpdatePlan, compute_plan};
pub use scan::{ScanError, build_snapshot, build_snapshot_async};
pub use types::{InstallationSnapshot, LocalFile, ProtectedPaths};
