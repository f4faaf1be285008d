//! Chat completions against a local llama-server.

pub mod supervisor;

use aibuddy_core::{AppConfig, ChatRequest, ChatResponse};
use anyhow::Result;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::error::Error as _;
use std::path::Path;
use std::time::Duration;

pub use supervisor::{
    Availability, DetachedLauncher, HealthProbe, HttpHealthProbe, LaunchSpec, ProcessLauncher,
    ServerSupervisor, SupervisorProgress, SupervisorSettings,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert Linux command line assistant. Generate accurate, secure commands for user requests.";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);
/// llama-server ignores the model name, but the OpenAI schema requires one.
pub const LOCAL_MODEL_NAME: &str = "local-model";

pub trait CompletionClient {
    /// Send one prompt and classify the outcome. Never panics and never
    /// returns `Err`; every failure is a [`ChatResponse`] variant.
    fn complete(&self, prompt: &str) -> ChatResponse;
}

type ProgressSink = Box<dyn Fn(&SupervisorProgress)>;

pub struct LlamaServerClient {
    cfg: AppConfig,
    client: Client,
    supervisor: ServerSupervisor,
    system_prompt: String,
    timeout: Duration,
    progress: ProgressSink,
}

impl LlamaServerClient {
    /// Client with the default supervisor; runtime files go under `runtime_dir`.
    pub fn new(cfg: AppConfig, runtime_dir: &Path) -> Result<Self> {
        let supervisor = ServerSupervisor::new(runtime_dir)?;
        Self::with_supervisor(cfg, supervisor, COMPLETION_TIMEOUT)
    }

    pub fn with_supervisor(
        cfg: AppConfig,
        supervisor: ServerSupervisor,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            cfg,
            client,
            supervisor,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout,
            progress: Box::new(|_| {}),
        })
    }

    /// Observe supervisor progress for every completion call.
    pub fn on_progress(mut self, sink: impl Fn(&SupervisorProgress) + 'static) -> Self {
        self.progress = Box::new(sink);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    pub fn chat_request(&self, prompt: &str) -> ChatRequest {
        ChatRequest {
            system_prompt: self.system_prompt.clone(),
            user_prompt: prompt.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// POST a request to `/v1/chat/completions`, assuming the server is up.
    pub fn send(&self, request: &ChatRequest) -> ChatResponse {
        let url = format!("{}/v1/chat/completions", self.cfg.base_url());
        let payload = json!({
            "model": LOCAL_MODEL_NAME,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = match self.client.post(&url).json(&payload).send() {
            Ok(response) => response,
            Err(err) => {
                return ChatResponse::TransportError {
                    message: describe_transport_error(&err, self.timeout),
                };
            }
        };
        let status = response.status();
        if status != StatusCode::OK {
            return ChatResponse::HttpError {
                status: status.as_u16(),
            };
        }
        match response.text() {
            Ok(body) => parse_completion_body(&body),
            Err(err) => ChatResponse::TransportError {
                message: describe_transport_error(&err, self.timeout),
            },
        }
    }
}

impl CompletionClient for LlamaServerClient {
    fn complete(&self, prompt: &str) -> ChatResponse {
        let availability = self
            .supervisor
            .ensure_available_with_progress(&self.cfg, |event| (self.progress)(event));
        if let Availability::Failed(reason) = availability {
            return ChatResponse::Unreachable { reason };
        }
        self.send(&self.chat_request(prompt))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Pull `choices[0].message.content` out of a 200 body. Anything that does
/// not fit that shape is a transport-level fault.
pub fn parse_completion_body(body: &str) -> ChatResponse {
    let parsed: CompletionBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return ChatResponse::TransportError {
                message: format!("malformed completion response: {err}"),
            };
        }
    };
    match parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
    {
        Some(text) => ChatResponse::Success { text },
        None => ChatResponse::TransportError {
            message: "completion response has no message content".to_string(),
        },
    }
}

fn describe_transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!(
            "request timed out after {:.1}s; the model may still be loading or the prompt is too large",
            timeout.as_secs_f64()
        )
    } else if err.is_connect() {
        "connection refused; the inference server stopped answering".to_string()
    } else {
        let detail = err
            .source()
            .map(|source| source.to_string())
            .unwrap_or_else(|| err.to_string());
        format!("network error: {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibuddy_testkit::{MockHttpResponse, MockHttpServer, closed_port};
    use serde_json::Value;
    use tempfile::TempDir;

    fn supervisor_without_launch(dir: &TempDir) -> ServerSupervisor {
        let launcher = |_: &LaunchSpec| -> Result<u32> { anyhow::bail!("launch disabled in tests") };
        ServerSupervisor::with_parts(
            dir.path(),
            Box::new(HttpHealthProbe::new(Duration::from_millis(500)).expect("probe")),
            Box::new(launcher),
            SupervisorSettings {
                poll_interval: Duration::from_millis(1),
                max_attempts: 2,
                probe_timeout: Duration::from_millis(500),
            },
        )
    }

    fn client_for(server: &MockHttpServer, dir: &TempDir, timeout: Duration) -> LlamaServerClient {
        LlamaServerClient::with_supervisor(server.config(), supervisor_without_launch(dir), timeout)
            .expect("client")
    }

    fn healthy_with(completion: Vec<MockHttpResponse>) -> MockHttpServer {
        MockHttpServer::start(vec![
            ("/health", vec![MockHttpResponse::health_ok()]),
            ("/v1/chat/completions", completion),
        ])
    }

    #[test]
    fn success_returns_first_choice_content() {
        let server = healthy_with(vec![MockHttpResponse::completion("ls -la")]);
        let dir = TempDir::new().expect("tempdir");
        let client = client_for(&server, &dir, COMPLETION_TIMEOUT);
        assert_eq!(
            client.complete("list files"),
            ChatResponse::Success {
                text: "ls -la".to_string()
            }
        );
    }

    #[test]
    fn payload_carries_system_and_user_messages() {
        let server = healthy_with(vec![MockHttpResponse::completion("pwd")]);
        let dir = TempDir::new().expect("tempdir");
        let client = client_for(&server, &dir, COMPLETION_TIMEOUT);
        client.complete("where am I");

        let request = server
            .requests()
            .into_iter()
            .find(|r| r.path == "/v1/chat/completions")
            .expect("completion request");
        assert_eq!(request.method, "POST");
        let body: Value = serde_json::from_str(&request.body).expect("json body");
        assert_eq!(body["model"], LOCAL_MODEL_NAME);
        assert_eq!(body["max_tokens"], 1024);
        assert!((body["temperature"].as_f64().expect("temperature") - 0.2).abs() < 1e-6);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "where am I");
    }

    #[test]
    fn non_200_is_http_error() {
        let server = healthy_with(vec![MockHttpResponse::status(500, "boom")]);
        let dir = TempDir::new().expect("tempdir");
        let client = client_for(&server, &dir, COMPLETION_TIMEOUT);
        assert_eq!(
            client.complete("anything"),
            ChatResponse::HttpError { status: 500 }
        );
    }

    #[test]
    fn malformed_body_is_transport_error() {
        let server = healthy_with(vec![MockHttpResponse::ok(r#"{"unexpected":true}"#)]);
        let dir = TempDir::new().expect("tempdir");
        let client = client_for(&server, &dir, COMPLETION_TIMEOUT);
        assert!(matches!(
            client.complete("anything"),
            ChatResponse::TransportError { .. }
        ));
    }

    #[test]
    fn slow_server_times_out_as_transport_error() {
        let mut slow = MockHttpResponse::completion("late");
        slow.delay = Some(Duration::from_millis(800));
        let server = healthy_with(vec![slow]);
        let dir = TempDir::new().expect("tempdir");
        let client = client_for(&server, &dir, Duration::from_millis(150));
        let ChatResponse::TransportError { message } = client.complete("anything") else {
            panic!("expected transport error");
        };
        assert!(message.contains("timed out"), "{message}");
    }

    #[test]
    fn unavailable_server_is_unreachable_without_request() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = AppConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: closed_port(),
            model_path: dir.path().join("missing.gguf"),
            ..AppConfig::default()
        };
        let client =
            LlamaServerClient::with_supervisor(cfg, supervisor_without_launch(&dir), COMPLETION_TIMEOUT)
                .expect("client");
        let ChatResponse::Unreachable { reason } = client.complete("anything") else {
            panic!("expected unreachable");
        };
        assert!(reason.contains("model not found"), "{reason}");
    }

    #[test]
    fn progress_sink_sees_probe() {
        let server = healthy_with(vec![MockHttpResponse::completion("true")]);
        let dir = TempDir::new().expect("tempdir");
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        let client = client_for(&server, &dir, COMPLETION_TIMEOUT)
            .on_progress(move |event| sink.borrow_mut().push(event.clone()));
        client.complete("noop");
        assert!(matches!(
            seen.borrow().first(),
            Some(SupervisorProgress::Probing { .. })
        ));
    }

    #[test]
    fn empty_choices_is_transport_error() {
        assert!(matches!(
            parse_completion_body(r#"{"choices":[]}"#),
            ChatResponse::TransportError { .. }
        ));
        assert_eq!(
            parse_completion_body(r#"{"choices":[{"message":{"content":""}}]}"#),
            ChatResponse::Success {
                text: String::new()
            }
        );
    }
}
