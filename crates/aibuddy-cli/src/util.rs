use aibuddy_tools::Approver;
use anyhow::{Result, anyhow};
use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;

/// Anything but `y`/`yes` (including EOF) is a no. The question goes to
/// stderr so `--json` output on stdout stays parseable.
pub(crate) fn prompt_yes_no(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let normalized = answer.trim().to_ascii_lowercase();
    Ok(matches!(normalized.as_str(), "y" | "yes"))
}

/// Ask for a value, keeping `current` on an empty answer.
pub(crate) fn prompt_value<T>(label: &str, current: &T) -> Result<T>
where
    T: FromStr + Display + Clone,
    T::Err: Display,
{
    print!("{label} [{current}]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return Ok(current.clone());
    }
    trimmed
        .parse()
        .map_err(|err| anyhow!("invalid value for {label}: {err}"))
}

/// Confirms on the terminal.
pub(crate) struct TerminalApprover;

impl Approver for TerminalApprover {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        prompt_yes_no(prompt)
    }
}
