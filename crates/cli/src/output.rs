//! Terminal output for the upkeep CLI.
//!
//! Status lines go to stdout, warnings and errors to stderr. Colors are only
//! emitted when the target stream supports them, so piped output stays plain.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  /// Machine-readable output on stdout; progress lines are suppressed.
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// A line in a plan listing.
#[derive(Debug, Clone, Copy)]
pub enum PlanMark {
  Add,
  Update,
  Delete,
}

impl PlanMark {
  /// `+`, `~` or `-`, colored for stdout.
  pub fn render(self) -> String {
    match self {
      PlanMark::Add => "+".if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      PlanMark::Update => "~".if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      PlanMark::Delete => "-".if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    }
  }
}

/// Check mark or cross for a per-file result.
pub fn result_mark(ok: bool) -> String {
  if ok {
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()).to_string()
  } else {
    symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string()
  }
}

pub fn truncate_hash(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }

  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    60.. => format!("{}m {}s", secs / 60, secs % 60),
    1.. => format!("{}.{:02}s", secs, duration.subsec_millis() / 10),
    0 => format!("{}ms", duration.subsec_millis()),
  }
}

#[derive(Clone, Copy)]
enum Level {
  Success,
  Info,
  Warning,
  Error,
}

fn emit(level: Level, message: &str) {
  match level {
    Level::Success => println!(
      "{} {message}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
    ),
    Level::Info => println!(
      "{} {message}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue())
    ),
    Level::Warning => eprintln!(
      "{} {}",
      symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    Level::Error => eprintln!(
      "{} {}",
      symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
  }
}

pub fn print_success(message: &str) {
  emit(Level::Success, message);
}

pub fn print_info(message: &str) {
  emit(Level::Info, message);
}

pub fn print_warning(message: &str) {
  emit(Level::Warning, message);
}

pub fn print_error(message: &str) {
  emit(Level::Error, message);
}

/// Indented `label: value` line.
pub fn print_stat(label: &str, value: impl Display) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

/// Dimmed trailing note, e.g. `(swapped in at next start)`.
pub fn dim(note: &str) -> String {
  note.if_supports_color(Stream::Stdout, |s| s.dimmed()).to_string()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
