use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub type Result<T> = anyhow::Result<T>;

pub const APP_DIR_NAME: &str = "aibuddy";
pub const DEFAULT_SERVER_HOST: &str = "localhost";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;
pub const DEFAULT_THREAD_COUNT: u32 = 4;

/// Exit status reported when the user declined a sensitive command and
/// nothing was spawned.
pub const CANCELLED_EXIT_STATUS: i32 = -1;
/// Exit status reported when the process could not be spawned or was
/// terminated by a signal.
pub const UNKNOWN_EXIT_STATUS: i32 = -2;
/// Exit status reported when a configured command timeout elapsed.
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// Substrings (matched case-insensitively against stderr) that mark a shell
/// command as failed even when it exited 0.
///
/// Arbitrary shell commands have no structured error channel, so this is a
/// known-imprecise heuristic: a tool that prints "0 errors" on stderr will
/// be treated as failing.
pub const FAILURE_MARKERS: &[&str] = &["error", "not found"];

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .filter(|home| !home.trim().is_empty())
        .map(PathBuf::from)
}

/// Per-user configuration directory: `$XDG_CONFIG_HOME/aibuddy`, falling back
/// to `~/.config/aibuddy`.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
        && !xdg.trim().is_empty()
    {
        return Some(Path::new(&xdg).join(APP_DIR_NAME));
    }
    Some(home_dir()?.join(".config").join(APP_DIR_NAME))
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub context_length: u32,
    pub thread_count: u32,
    /// Kill shell commands that run longer than this. Absent means commands
    /// run until they exit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_seconds: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("~/models/model.gguf"),
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            context_length: DEFAULT_CONTEXT_LENGTH,
            thread_count: DEFAULT_THREAD_COUNT,
            command_timeout_seconds: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server_port must be a valid TCP port (1-65535)")]
    InvalidPort,
    #[error("thread_count must be greater than zero")]
    InvalidThreadCount,
    #[error("context_length must be greater than zero")]
    InvalidContextLength,
    #[error("server_host must not be empty")]
    EmptyHost,
}

impl AppConfig {
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join("config.json")
    }

    /// Load the config file in `dir`, filling missing fields from defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        let path = Self::config_path(dir);
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let value: serde_json::Value = serde_json::from_str(&raw).map_err(|err| {
                anyhow::anyhow!("malformed configuration at {}: {err}", path.display())
            })?;
            merge_json_value(&mut merged, &value);
        }
        let cfg: Self = serde_json::from_value(merged).map_err(|err| {
            anyhow::anyhow!("malformed configuration at {}: {err}", path.display())
        })?;
        cfg.validate()
            .map_err(|err| anyhow::anyhow!("invalid configuration at {}: {err}", path.display()))?;
        Ok(cfg)
    }

    /// Load the config, writing defaults first if the file does not exist.
    pub fn ensure(dir: &Path) -> Result<Self> {
        if Self::config_path(dir).exists() {
            return Self::load(dir);
        }
        let cfg = Self::default();
        cfg.save(dir)?;
        Ok(cfg)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        fs::create_dir_all(dir)?;
        fs::write(Self::config_path(dir), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.server_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.thread_count == 0 {
            return Err(ConfigError::InvalidThreadCount);
        }
        if self.context_length == 0 {
            return Err(ConfigError::InvalidContextLength);
        }
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        Ok(())
    }

    /// Model path with `~` expanded; relative paths are anchored at `base`.
    pub fn resolved_model_path(&self, base: &Path) -> PathBuf {
        let expanded = expand_tilde(&self.model_path);
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

/// Read/write capability for the persisted configuration.
pub trait ConfigStore {
    fn load(&self) -> Result<AppConfig>;
    fn save(&self, cfg: &AppConfig) -> Result<()>;
    /// Directory that config-relative artifacts (logs, pid file) live in.
    fn dir(&self) -> &Path;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the per-user config directory.
    pub fn for_user() -> Result<Self> {
        let dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("cannot locate a home directory for configuration"))?;
        Ok(Self::new(dir))
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<AppConfig> {
        AppConfig::ensure(&self.dir)
    }

    fn save(&self, cfg: &AppConfig) -> Result<()> {
        cfg.save(&self.dir)
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Outcome of one chat completion call, validated at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatResponse {
    Success { text: String },
    Unreachable { reason: String },
    HttpError { status: u16 },
    TransportError { message: String },
}

impl ChatResponse {
    pub fn into_text(self) -> std::result::Result<String, LifecycleError> {
        match self {
            Self::Success { text } => Ok(text),
            Self::Unreachable { reason } => Err(LifecycleError::Unreachable { reason }),
            Self::HttpError { status } => Err(LifecycleError::Http { status }),
            Self::TransportError { message } => Err(LifecycleError::Transport { message }),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleError {
    #[error("inference server unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("inference server returned HTTP {status}")]
    Http { status: u16 },
    #[error("request to inference server failed: {message}")]
    Transport { message: String },
    #[error("model response did not contain a command")]
    ExtractionEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
    pub combined_output: String,
}

impl ExecutionResult {
    pub fn from_streams(stdout: String, stderr: String, exit_status: i32) -> Self {
        let mut combined_output = stdout.clone();
        if !stderr.is_empty() {
            combined_output.push_str("\nErrors:\n");
            combined_output.push_str(&stderr);
        }
        Self {
            stdout,
            stderr,
            exit_status,
            combined_output,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_status: CANCELLED_EXIT_STATUS,
            combined_output: "Command execution cancelled.".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.exit_status == CANCELLED_EXIT_STATUS
    }

    /// Non-zero exit, or stderr containing one of [`FAILURE_MARKERS`].
    pub fn signals_failure(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if self.exit_status != 0 {
            return true;
        }
        let stderr = self.stderr.to_lowercase();
        FAILURE_MARKERS.iter().any(|marker| stderr.contains(marker))
    }
}

/// Lifecycle events appended to the observe log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ServerProbe {
        url: String,
        healthy: bool,
    },
    ServerLaunched {
        program: PathBuf,
        pid: u32,
        log_path: PathBuf,
    },
    ServerUnavailable {
        reason: String,
    },
    CompletionRequested {
        prompt_chars: usize,
    },
    CompletionFinished {
        outcome: String,
    },
    CommandExecuted {
        command: String,
        exit_status: i32,
        failed: bool,
    },
    ConfirmationDeclined {
        command: String,
    },
    RepairAttempted {
        command: String,
    },
    RepairApplied {
        original: String,
        repaired: String,
        exit_status: i32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    pub fn now(event: LifecycleEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}
