//! Execute, and on a failure signal ask the model for one corrected command.

use crate::extract::extract_scan;
use crate::prompts::repair_prompt;
use crate::{EventSink, complete_observed, emit};
use aibuddy_core::{ExecutionResult, LifecycleError, LifecycleEvent};
use aibuddy_llm::CompletionClient;
use aibuddy_tools::{Approver, CommandExecutor};
use anyhow::Result;
use serde::Serialize;

pub const FIX_OFFER_PROMPT: &str = "Would you like me to try to fix any errors in this command?";

pub fn run_fixed_prompt(candidate: &str) -> String {
    format!("Would you like to execute the fixed command? [{candidate}]")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Executed,
    Diagnosing,
    Repaired,
    Done,
}

/// Why the loop reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RepairStop {
    /// The original command showed no failure signal.
    NoFailure,
    /// The user did not want a diagnosis.
    DiagnosisDeclined,
    ModelFailed { error: LifecycleError },
    NoCandidate,
    RepairDeclined,
    /// The repaired command ran; its own result may still be a failure.
    RepairExecuted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub command: String,
    pub original: ExecutionResult,
    /// Full model response to the repair prompt.
    pub diagnosis: Option<String>,
    pub candidate: Option<String>,
    pub repaired: Option<ExecutionResult>,
    pub stop: RepairStop,
    pub transitions: Vec<RepairState>,
}

impl RepairOutcome {
    /// The repaired run if there was one, else the original.
    pub fn final_result(&self) -> &ExecutionResult {
        self.repaired.as_ref().unwrap_or(&self.original)
    }

    pub fn model_error(&self) -> Option<&LifecycleError> {
        match &self.stop {
            RepairStop::ModelFailed { error } => Some(error),
            _ => None,
        }
    }
}

/// At most one repair cycle per invocation. A repaired command is never run
/// without the approver saying yes, and its result is final even if it fails
/// again.
pub struct RepairLoop<'a> {
    client: &'a dyn CompletionClient,
    executor: &'a CommandExecutor,
    ask_before_diagnosing: bool,
    events: Option<EventSink<'a>>,
    on_diagnosis: Option<Box<dyn FnMut(&str) + 'a>>,
}

impl<'a> RepairLoop<'a> {
    pub fn new(client: &'a dyn CompletionClient, executor: &'a CommandExecutor) -> Self {
        Self {
            client,
            executor,
            ask_before_diagnosing: false,
            events: None,
            on_diagnosis: None,
        }
    }

    /// Ask [`FIX_OFFER_PROMPT`] before contacting the model.
    pub fn ask_before_diagnosing(mut self, ask: bool) -> Self {
        self.ask_before_diagnosing = ask;
        self
    }

    pub fn with_events(mut self, events: EventSink<'a>) -> Self {
        self.events = Some(events);
        self
    }

    /// Called with the model's full repair response before the candidate is
    /// offered for execution.
    pub fn on_diagnosis(mut self, hook: impl FnMut(&str) + 'a) -> Self {
        self.on_diagnosis = Some(Box::new(hook));
        self
    }

    /// Run `command`, then repair it if it failed.
    pub fn run(&mut self, command: &str, approver: &mut dyn Approver) -> Result<RepairOutcome> {
        let original = self.executor.run(command, approver)?;
        self.repair_after(command, original, approver)
    }

    /// Continue from an execution the caller already performed.
    pub fn repair_after(
        &mut self,
        command: &str,
        original: ExecutionResult,
        approver: &mut dyn Approver,
    ) -> Result<RepairOutcome> {
        emit(self.events, executed_event(command, &original));
        let mut outcome = RepairOutcome {
            command: command.to_string(),
            original,
            diagnosis: None,
            candidate: None,
            repaired: None,
            stop: RepairStop::NoFailure,
            transitions: vec![RepairState::Executed],
        };

        if !outcome.original.signals_failure() {
            return Ok(finish(outcome, RepairStop::NoFailure));
        }
        if self.ask_before_diagnosing && !approver.confirm(FIX_OFFER_PROMPT)? {
            return Ok(finish(outcome, RepairStop::DiagnosisDeclined));
        }

        outcome.transitions.push(RepairState::Diagnosing);
        emit(
            self.events,
            LifecycleEvent::RepairAttempted {
                command: command.to_string(),
            },
        );
        let prompt = repair_prompt(command, &outcome.original.combined_output);
        let text = match complete_observed(self.client, self.events, &prompt).into_text() {
            Ok(text) => text,
            Err(error) => return Ok(finish(outcome, RepairStop::ModelFailed { error })),
        };
        if let Some(hook) = self.on_diagnosis.as_mut() {
            hook(&text);
        }
        let candidate = extract_scan(&text);
        outcome.diagnosis = Some(text);
        let Some(candidate) = candidate else {
            return Ok(finish(outcome, RepairStop::NoCandidate));
        };
        outcome.candidate = Some(candidate.clone());

        if !approver.confirm(&run_fixed_prompt(&candidate))? {
            emit(
                self.events,
                LifecycleEvent::ConfirmationDeclined {
                    command: candidate,
                },
            );
            return Ok(finish(outcome, RepairStop::RepairDeclined));
        }

        let repaired = self.executor.run(&candidate, approver)?;
        emit(self.events, executed_event(&candidate, &repaired));
        emit(
            self.events,
            LifecycleEvent::RepairApplied {
                original: command.to_string(),
                repaired: candidate,
                exit_status: repaired.exit_status,
            },
        );
        outcome.repaired = Some(repaired);
        outcome.transitions.push(RepairState::Repaired);
        Ok(finish(outcome, RepairStop::RepairExecuted))
    }
}

fn finish(mut outcome: RepairOutcome, stop: RepairStop) -> RepairOutcome {
    outcome.stop = stop;
    outcome.transitions.push(RepairState::Done);
    outcome
}

/// `ConfirmationDeclined` for a cancelled run, otherwise `CommandExecuted`.
pub fn executed_event(command: &str, result: &ExecutionResult) -> LifecycleEvent {
    if result.is_cancelled() {
        return LifecycleEvent::ConfirmationDeclined {
            command: command.to_string(),
        };
    }
    LifecycleEvent::CommandExecuted {
        command: command.to_string(),
        exit_status: result.exit_status,
        failed: result.signals_failure(),
    }
}
