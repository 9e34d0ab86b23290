//! Remote desired state.
//!
//! The manifest describes the tree a release should have on disk. It is
//! fetched once per check cycle, validated as a whole and then treated as
//! immutable.

mod classify;
mod fetch;
mod generate;
mod types;
mod version;

pub use classify::ClassificationTable;
pub use fetch::{ManifestError, ManifestFetcher, REQUIRED_FIELDS, from_wire, parse_manifest};
pub use generate::{GENERATOR_EXCLUDES, GenerateError, generate_manifest};
pub use types::*;
pub use version::{VersionChange, below_minimum, compare_versions, parse_version};
