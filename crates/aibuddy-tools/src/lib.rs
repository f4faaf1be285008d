//! Safety-gated shell execution.
//!
//! [`CommandExecutor`] classifies a command against the sensitivity denylist,
//! asks an [`Approver`] before running anything sensitive, and folds the
//! process outcome into an [`ExecutionResult`]. A failing shell command is
//! ordinary data here, never an `Err`.

pub mod shell;

use aibuddy_core::{ExecutionResult, TIMEOUT_EXIT_STATUS, UNKNOWN_EXIT_STATUS};
use aibuddy_policy::{SensitiveMatch, SensitivityPolicy};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use shell::{PlatformShellRunner, ShellRunResult, ShellRunner};

/// Interactive yes/no gate.
pub trait Approver {
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

impl<F> Approver for F
where
    F: FnMut(&str) -> Result<bool>,
{
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        self(prompt)
    }
}

/// Approver that answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub bool);

impl Approver for FixedApprover {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}

pub fn sensitive_prompt(found: &SensitiveMatch) -> String {
    format!(
        "This command may modify your system (`{}`). Proceed?",
        found.token
    )
}

pub struct CommandExecutor {
    policy: SensitivityPolicy,
    runner: Box<dyn ShellRunner>,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    pub fn new(policy: SensitivityPolicy, runner: Box<dyn ShellRunner>, cwd: &Path) -> Self {
        Self {
            policy,
            runner,
            cwd: cwd.to_path_buf(),
            timeout: None,
        }
    }

    pub fn platform(cwd: &Path) -> Result<Self> {
        Ok(Self::new(
            SensitivityPolicy::new()?,
            Box::new(PlatformShellRunner),
            cwd,
        ))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `command`, asking `approver` first when it is sensitive.
    ///
    /// Only a failing approver surfaces as `Err`; spawn failures and
    /// non-zero exits come back inside the result.
    pub fn run(&self, command: &str, approver: &mut dyn Approver) -> Result<ExecutionResult> {
        if let Some(found) = self.policy.classify(command)
            && !approver.confirm(&sensitive_prompt(&found))?
        {
            return Ok(ExecutionResult::cancelled());
        }

        let outcome = match self.runner.run(command, &self.cwd, self.timeout) {
            Ok(outcome) => outcome,
            Err(err) => {
                return Ok(ExecutionResult::from_streams(
                    String::new(),
                    format!("Error executing command: {err}"),
                    UNKNOWN_EXIT_STATUS,
                ));
            }
        };

        let exit_status = if outcome.timed_out {
            TIMEOUT_EXIT_STATUS
        } else {
            outcome.status.unwrap_or(UNKNOWN_EXIT_STATUS)
        };
        let mut stderr = outcome.stderr;
        if outcome.timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "command timed out after {}s",
                self.timeout.map(|t| t.as_secs()).unwrap_or_default()
            ));
        }
        Ok(ExecutionResult::from_streams(
            outcome.stdout,
            stderr,
            exit_status,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibuddy_core::CANCELLED_EXIT_STATUS;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default, Clone)]
    struct RecordingRunner {
        calls: Rc<RefCell<Vec<String>>>,
        reply: Option<ShellRunResult>,
    }

    impl ShellRunner for RecordingRunner {
        fn run(&self, cmd: &str, _cwd: &Path, _timeout: Option<Duration>) -> Result<ShellRunResult> {
            self.calls.borrow_mut().push(cmd.to_string());
            self.reply
                .clone()
                .ok_or_else(|| anyhow!("no such shell"))
        }
    }

    fn ok_reply(stdout: &str, stderr: &str, status: i32) -> ShellRunResult {
        ShellRunResult {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    fn executor(runner: RecordingRunner) -> CommandExecutor {
        CommandExecutor::new(
            SensitivityPolicy::new().expect("policy"),
            Box::new(runner),
            Path::new("."),
        )
    }

    #[test]
    fn declined_sensitive_command_never_spawns() {
        let runner = RecordingRunner {
            reply: Some(ok_reply("", "", 0)),
            ..Default::default()
        };
        let calls = Rc::clone(&runner.calls);
        let mut prompts = Vec::new();
        let mut approver = |prompt: &str| -> Result<bool> {
            prompts.push(prompt.to_string());
            Ok(false)
        };
        let result = executor(runner)
            .run("rm -rf /tmp/x", &mut approver)
            .expect("run");
        assert_eq!(result.exit_status, CANCELLED_EXIT_STATUS);
        assert!(result.combined_output.contains("cancelled"));
        assert!(calls.borrow().is_empty());
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("rm"));
    }

    #[test]
    fn confirmed_sensitive_command_runs() {
        let runner = RecordingRunner {
            reply: Some(ok_reply("", "", 0)),
            ..Default::default()
        };
        let calls = Rc::clone(&runner.calls);
        let result = executor(runner)
            .run("sudo true", &mut FixedApprover(true))
            .expect("run");
        assert_eq!(result.exit_status, 0);
        assert_eq!(calls.borrow().as_slice(), ["sudo true"]);
    }

    #[test]
    fn ordinary_command_runs_without_asking() {
        let runner = RecordingRunner {
            reply: Some(ok_reply("a\nb\n", "", 0)),
            ..Default::default()
        };
        let mut approver = |_: &str| -> Result<bool> { panic!("must not ask for ls") };
        let result = executor(runner).run("ls", &mut approver).expect("run");
        assert_eq!(result.combined_output, "a\nb\n");
        assert!(!result.signals_failure());
    }

    #[test]
    fn stderr_is_appended_with_separator() {
        let runner = RecordingRunner {
            reply: Some(ok_reply("", "sh: 1: catt: not found\n", 127)),
            ..Default::default()
        };
        let result = executor(runner)
            .run("catt file.txt", &mut FixedApprover(false))
            .expect("run");
        assert_eq!(result.exit_status, 127);
        assert_eq!(result.combined_output, "\nErrors:\nsh: 1: catt: not found\n");
        assert!(result.signals_failure());
    }

    #[test]
    fn spawn_failure_is_reported_as_data() {
        let result = executor(RecordingRunner::default())
            .run("ls", &mut FixedApprover(true))
            .expect("run");
        assert_eq!(result.exit_status, UNKNOWN_EXIT_STATUS);
        assert!(result.stderr.contains("Error executing command"));
        assert!(result.signals_failure());
    }

    #[test]
    fn timeout_maps_to_timeout_status() {
        let runner = RecordingRunner {
            reply: Some(ShellRunResult {
                status: None,
                stdout: "partial".to_string(),
                stderr: String::new(),
                timed_out: true,
            }),
            ..Default::default()
        };
        let result = executor(runner)
            .with_timeout(Some(Duration::from_secs(2)))
            .run("sleep 10", &mut FixedApprover(true))
            .expect("run");
        assert_eq!(result.exit_status, TIMEOUT_EXIT_STATUS);
        assert!(result.stderr.contains("timed out after 2s"));
    }

    #[cfg(unix)]
    #[test]
    fn platform_executor_runs_real_shell() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("file.txt"), "hello\n").expect("write");
        let executor = CommandExecutor::platform(dir.path()).expect("executor");
        let result = executor
            .run("cat file.txt", &mut FixedApprover(false))
            .expect("run");
        assert_eq!(result.exit_status, 0);
        assert_eq!(result.stdout, "hello\n");
    }
}
