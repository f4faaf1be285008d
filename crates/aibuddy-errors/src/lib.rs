//! User-facing error messages with recovery suggestions.
//!
//! Lifecycle failures (server unreachable, HTTP errors, empty extractions)
//! and configuration problems each get a titled, categorized message that the
//! CLI prints instead of a bare error chain.

use aibuddy_core::{ConfigError, LifecycleError};
use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Enhanced error with user-friendly message and recovery suggestions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub error_type: ErrorType,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    /// Missing or invalid settings in config.json
    Configuration,
    /// The inference server could not be reached or timed out
    Network,
    /// The inference server answered but the answer was unusable
    Server,
    Permission,
    Unknown,
}

impl EnhancedError {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            suggestions: Vec::new(),
            error_type,
            context: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    /// Diagnostics for a failed model interaction. `runtime_dir` is where
    /// server.log lives, when known.
    pub fn from_lifecycle(err: &LifecycleError, runtime_dir: Option<&Path>) -> Self {
        let log_hint = match runtime_dir {
            Some(dir) => format!("Check {} for server output", dir.join("server.log").display()),
            None => "Check server.log in the aibuddy config directory".to_string(),
        };
        match err {
            LifecycleError::Unreachable { reason } if reason.contains("model not found") => {
                errors::model_missing(reason)
            }
            LifecycleError::Unreachable { reason } if reason.contains("llama-server not found") => {
                errors::server_binary_missing(reason)
            }
            LifecycleError::Unreachable { reason } => EnhancedError::new(
                "Inference Server Unavailable",
                reason.clone(),
                ErrorType::Network,
            )
            .with_suggestions(vec![
                log_hint,
                "Start the server manually with `aibuddy server --start`".to_string(),
                "Make sure server_host and server_port in config.json are correct".to_string(),
            ]),
            LifecycleError::Http { status } => EnhancedError::new(
                "Inference Server Error",
                format!("The server answered with HTTP {status}."),
                ErrorType::Server,
            )
            .with_suggestions(vec![
                log_hint,
                "Lower context_length if the model ran out of memory".to_string(),
            ]),
            LifecycleError::Transport { message } => {
                EnhancedError::new("Request Failed", message.clone(), ErrorType::Network)
                    .with_suggestions(vec![
                        log_hint,
                        "Try again once the model has finished loading".to_string(),
                    ])
            }
            LifecycleError::ExtractionEmpty => EnhancedError::new(
                "No Command Generated",
                "The model response did not contain a command.",
                ErrorType::Server,
            )
            .with_suggestion("Rephrase the request more concretely"),
        }
    }

    /// Format error for display
    pub fn format(&self, verbose: bool) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}: {}\n", self.error_type.emoji(), self.title));
        output.push_str(&format!("  {}\n", self.message));

        if verbose && let Some(context) = &self.context {
            output.push_str(&format!("\n  Context: {context}\n"));
        }

        if !self.suggestions.is_empty() {
            output.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }
        output
    }
}

impl ErrorType {
    pub fn emoji(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "🔧",
            ErrorType::Network => "🌐",
            ErrorType::Server => "🤖",
            ErrorType::Permission => "🔒",
            ErrorType::Unknown => "❓",
        }
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

impl std::error::Error for EnhancedError {}

/// Turns any error escaping a subcommand into printable diagnostics.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    verbose: bool,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn handle(&self, error: &Error) -> String {
        self.enhance(error).format(self.verbose)
    }

    pub fn enhance(&self, error: &Error) -> EnhancedError {
        if let Some(enhanced) = error.downcast_ref::<EnhancedError>() {
            return enhanced.clone();
        }
        if let Some(lifecycle) = error.downcast_ref::<LifecycleError>() {
            return EnhancedError::from_lifecycle(lifecycle, None);
        }
        if let Some(config) = error.downcast_ref::<ConfigError>() {
            return errors::invalid_configuration(&config.to_string());
        }
        let chain = format!("{error:#}");
        classify_error(&chain).with_context(format!("{error:?}"))
    }
}

fn classify_error(error_message: &str) -> EnhancedError {
    let lower_error = error_message.to_lowercase();

    if lower_error.contains("configuration") || lower_error.contains("config.json") {
        return errors::invalid_configuration(error_message);
    }

    if lower_error.contains("permission denied") || lower_error.contains("read-only") {
        return EnhancedError::new("Permission Error", error_message, ErrorType::Permission)
            .with_suggestions(vec![
                "Check that the aibuddy config directory is writable".to_string(),
                "Set XDG_CONFIG_HOME to a writable location".to_string(),
            ]);
    }

    if lower_error.contains("timed out") || lower_error.contains("connection") {
        return EnhancedError::new("Network Error", error_message, ErrorType::Network)
            .with_suggestion("Check that the inference server is running with `aibuddy server`");
    }

    EnhancedError::new("Error", error_message, ErrorType::Unknown)
        .with_suggestion("Re-run with --verbose for more detail")
}

/// Constructors for frequently encountered errors
pub mod errors {
    use super::*;

    pub fn model_missing(reason: &str) -> EnhancedError {
        EnhancedError::new("Model Not Found", reason, ErrorType::Configuration).with_suggestions(
            vec![
                "Download a GGUF model and point model_path at it".to_string(),
                "Run `aibuddy config` to update model_path".to_string(),
            ],
        )
    }

    pub fn server_binary_missing(reason: &str) -> EnhancedError {
        EnhancedError::new("llama-server Not Installed", reason, ErrorType::Configuration)
            .with_suggestions(vec![
                "Build llama.cpp and put llama-server on your PATH".to_string(),
                "Or install it at ~/llama.cpp/llama-server or /usr/local/bin/llama-server"
                    .to_string(),
            ])
    }

    pub fn invalid_configuration(detail: &str) -> EnhancedError {
        EnhancedError::new("Invalid Configuration", detail, ErrorType::Configuration)
            .with_suggestions(vec![
                "Run `aibuddy config` to rewrite the settings".to_string(),
                "Or delete config.json to restore defaults".to_string(),
            ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn formatting_numbers_suggestions() {
        let error = EnhancedError::new("Test Error", "Something went wrong", ErrorType::Server)
            .with_suggestion("Try again")
            .with_suggestion("Check documentation");
        let formatted = error.format(false);
        assert!(formatted.contains("Test Error"));
        assert!(formatted.contains("Something went wrong"));
        assert!(formatted.contains("1. Try again"));
        assert!(formatted.contains("2. Check documentation"));
    }

    #[test]
    fn context_only_in_verbose_mode() {
        let error = EnhancedError::new("T", "M", ErrorType::Server).with_context("inner detail");
        assert!(!error.format(false).contains("inner detail"));
        assert!(error.format(true).contains("inner detail"));
    }

    #[test]
    fn unreachable_server_points_at_server_log() {
        let err = LifecycleError::Unreachable {
            reason: "startup timeout".to_string(),
        };
        let enhanced = EnhancedError::from_lifecycle(&err, Some(Path::new("/tmp/aibuddy")));
        assert_eq!(enhanced.error_type, ErrorType::Network);
        assert!(enhanced.suggestions[0].contains("/tmp/aibuddy/server.log"));
    }

    #[test]
    fn missing_model_is_configuration_problem() {
        let err = LifecycleError::Unreachable {
            reason: "model not found at /models/x.gguf".to_string(),
        };
        let enhanced = EnhancedError::from_lifecycle(&err, None);
        assert_eq!(enhanced.error_type, ErrorType::Configuration);
        assert_eq!(enhanced.title, "Model Not Found");
    }

    #[test]
    fn handler_downcasts_lifecycle_errors() {
        let error = Error::new(LifecycleError::Http { status: 500 });
        let output = ErrorHandler::new().handle(&error);
        assert!(output.contains("Inference Server Error"));
        assert!(output.contains("HTTP 500"));
    }

    #[test]
    fn handler_preserves_enhanced_errors() {
        let error = EnhancedError::new("Permission Error", "Denied", ErrorType::Permission)
            .into_error();
        let output = ErrorHandler::new().handle(&error);
        assert!(output.contains("Permission Error"));
        assert!(output.contains("Denied"));
    }

    #[test]
    fn handler_classifies_config_chains() {
        let error = Err::<(), _>(anyhow!("expected value at line 1"))
            .context("malformed configuration at /home/u/.config/aibuddy/config.json")
            .expect_err("error");
        let enhanced = ErrorHandler::new().enhance(&error);
        assert_eq!(enhanced.title, "Invalid Configuration");
    }
}
