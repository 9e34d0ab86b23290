//! Restart classification table.
//!
//! Maps a file path to the [`RestartClass`] its replacement requires. Patterns
//! beginning with `.` match a file extension (case-insensitive); any other
//! pattern matches the file name exactly, or the whole relative path when it
//! contains a `/`.

use serde::{Deserialize, Serialize};

use super::types::RestartClass;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationTable {
  /// Patterns whose replacement needs a full process replacement.
  pub hard: Vec<String>,
  /// Patterns whose replacement needs an orchestrated restart.
  pub soft: Vec<String>,
}

impl Default for ClassificationTable {
  fn default() -> Self {
    Self {
      hard: [".exe", ".dll", ".so", ".dylib"].map(String::from).to_vec(),
      soft: ["main_simple.py", "overlay_windows.py", "launcher.py"]
        .map(String::from)
        .to_vec(),
    }
  }
}

impl ClassificationTable {
  /// Classify a relative path. Hard patterns win over soft ones.
  pub fn classify(&self, path: &str) -> RestartClass {
    if self.hard.iter().any(|p| pattern_matches(p, path)) {
      RestartClass::Hard
    } else if self.soft.iter().any(|p| pattern_matches(p, path)) {
      RestartClass::Soft
    } else {
      RestartClass::None
    }
  }

  /// Effective class of an entry: the most severe of the table result and the
  /// manifest's own hint, when it carries a recognised one.
  pub fn resolve(&self, path: &str, hint: Option<&str>) -> RestartClass {
    let table = self.classify(path);
    let hinted = hint.and_then(|h| h.parse::<RestartClass>().ok()).unwrap_or_default();
    table.max(hinted)
  }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
  let normalized = path.replace('\\', "/");
  let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);

  if pattern.starts_with('.') {
    file_name.to_ascii_lowercase().ends_with(&pattern.to_ascii_lowercase())
  } else if pattern.contains('/') {
    normalized == pattern
  } else {
    file_name == pattern
  }
}
