//! Command lifecycle: prompt the model, extract a command, run it, and repair
//! it once when it fails.

pub mod extract;
pub mod prompts;
pub mod repair;

use aibuddy_core::{ChatResponse, LifecycleError, LifecycleEvent};
use aibuddy_llm::CompletionClient;
use aibuddy_tools::{Approver, CommandExecutor};
use anyhow::Result;

pub use extract::{ExtractMode, extract};
pub use repair::{RepairLoop, RepairOutcome, RepairState, RepairStop};

/// Receives lifecycle events as they happen.
pub type EventSink<'a> = &'a dyn Fn(&LifecycleEvent);

pub(crate) fn emit(events: Option<EventSink<'_>>, event: LifecycleEvent) {
    if let Some(sink) = events {
        sink(&event);
    }
}

pub(crate) fn complete_observed(
    client: &dyn CompletionClient,
    events: Option<EventSink<'_>>,
    prompt: &str,
) -> ChatResponse {
    emit(
        events,
        LifecycleEvent::CompletionRequested {
            prompt_chars: prompt.chars().count(),
        },
    );
    let response = client.complete(prompt);
    if let ChatResponse::Unreachable { reason } = &response {
        emit(
            events,
            LifecycleEvent::ServerUnavailable {
                reason: reason.clone(),
            },
        );
    }
    emit(
        events,
        LifecycleEvent::CompletionFinished {
            outcome: outcome_label(&response).to_string(),
        },
    );
    response
}

pub fn outcome_label(response: &ChatResponse) -> &'static str {
    match response {
        ChatResponse::Success { .. } => "success",
        ChatResponse::Unreachable { .. } => "unreachable",
        ChatResponse::HttpError { .. } => "http_error",
        ChatResponse::TransportError { .. } => "transport_error",
    }
}

/// Entry points behind `generate`, `explain` and `fix`.
pub struct Assistant<'a> {
    client: &'a dyn CompletionClient,
    events: Option<EventSink<'a>>,
}

impl<'a> Assistant<'a> {
    pub fn new(client: &'a dyn CompletionClient) -> Self {
        Self {
            client,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSink<'a>) -> Self {
        self.events = Some(events);
        self
    }

    /// Ask for a single command matching `description`.
    pub fn generate(&self, description: &str) -> Result<String, LifecycleError> {
        let text = complete_observed(self.client, self.events, &prompts::generate_prompt(description))
            .into_text()?;
        extract(&text, ExtractMode::Direct).ok_or(LifecycleError::ExtractionEmpty)
    }

    /// Free-form breakdown of what `command` does.
    pub fn explain(&self, command: &str) -> Result<String, LifecycleError> {
        complete_observed(self.client, self.events, &prompts::explain_prompt(command)).into_text()
    }

    /// Repair loop bound to this assistant's client and event sink.
    pub fn repair_loop(&self, executor: &'a CommandExecutor) -> RepairLoop<'a> {
        let repair = RepairLoop::new(self.client, executor);
        match self.events {
            Some(events) => repair.with_events(events),
            None => repair,
        }
    }

    /// Run `command` and, if it fails, go straight to diagnosis.
    pub fn fix(
        &self,
        executor: &'a CommandExecutor,
        command: &str,
        approver: &mut dyn Approver,
    ) -> Result<RepairOutcome> {
        self.repair_loop(executor).run(command, approver)
    }
}
