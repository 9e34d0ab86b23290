//! End-to-end tests driving the `upkeep` binary against local release trees.

mod common;

mod apply_tests;
mod backup_tests;
mod manifest_tests;
mod status_tests;
