//! upkeep-lib: self-updating deployment engine
//!
//! Keeps an installed file tree in step with a remote manifest:
//! - `snapshot`: content-addressed inventory of the local tree and the diff
//!   planner producing an `UpdatePlan`
//! - `manifest`: remote desired state, its fetcher and generator
//! - `download`: fallback strategy chain with a content-addressed cache
//! - `backup`: zip archives of the tree for rollback
//! - `apply`: staging, atomic replacement and locked-file deferral
//! - `reload`: in-process module registry for hot reloads
//! - `session`: the state machine driving a check/apply cycle

pub mod apply;
pub mod backup;
pub mod config;
pub mod consts;
pub mod download;
pub mod install_lock;
pub mod manifest;
pub mod platform;
pub mod reload;
pub mod session;
pub mod snapshot;
pub mod util;
