use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Result, bail};

/// Ask a yes/no question on stderr. `force` answers yes without asking; a
/// non-interactive session without `force` is an error rather than a silent no.
pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }
  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Cannot prompt for confirmation in non-interactive mode. Use --force to proceed.");
  }
  Ok(ask(io::stdin().lock(), io::stderr(), message)?)
}

fn ask(mut input: impl BufRead, mut prompt: impl Write, message: &str) -> io::Result<bool> {
  write!(prompt, "{message} [y/N] ")?;
  prompt.flush()?;

  let mut answer = String::new();
  input.read_line(&mut answer)?;
  Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
