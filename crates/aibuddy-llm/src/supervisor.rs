//! Keeps a llama-server endpoint available, launching one in the background
//! when the health probe finds nothing listening.

use aibuddy_core::AppConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

pub const SERVER_BINARY: &str = "llama-server";
pub const SERVER_LOG_FILE: &str = "server.log";
pub const SERVER_PID_FILE: &str = "server.pid";
pub const STARTUP_TIMEOUT_REASON: &str = "startup timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Failed(String),
}

/// Status updates emitted while supervising, for display and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorProgress {
    Probing { url: String },
    /// Result of the initial health probe.
    Probed { url: String, healthy: bool },
    Launching { program: PathBuf, log_path: PathBuf },
    Launched { program: PathBuf, pid: u32, log_path: PathBuf },
    Waiting { attempt: u32, max_attempts: u32 },
    Ready,
    Failed { reason: String },
}

pub trait HealthProbe {
    /// True when `GET {base_url}/health` answers 200.
    fn is_healthy(&self, base_url: &str) -> bool;
}

pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn is_healthy(&self, base_url: &str) -> bool {
        self.client
            .get(format!("{base_url}/health"))
            .send()
            .is_ok_and(|resp| resp.status() == StatusCode::OK)
    }
}

/// Everything needed to start a process that outlives the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Receives both stdout and stderr of the launched process.
    pub log_path: PathBuf,
}

pub trait DetachedLauncher {
    /// Start the process and return its PID without waiting for it.
    fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
}

impl<F> DetachedLauncher for F
where
    F: Fn(&LaunchSpec) -> Result<u32>,
{
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        self(spec)
    }
}

/// Spawns the process in its own process group with output appended to the
/// log file, so it keeps running after the CLI exits.
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl DetachedLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)
            .with_context(|| format!("open server log {}", spec.log_path.display()))?;
        let err_log = log.try_clone()?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log));
        detach(&mut command);

        let child = command
            .spawn()
            .with_context(|| format!("spawn {}", spec.program.display()))?;
        Ok(child.id())
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// Locate llama-server: `PATH` first, then `~/llama.cpp/`, then
/// `/usr/local/bin/`.
pub fn resolve_server_binary() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH");
    let home = std::env::var_os("HOME").map(PathBuf::from);
    resolve_server_binary_from(path_var.as_deref(), home.as_deref())
}

pub fn resolve_server_binary_from(path_var: Option<&OsStr>, home: Option<&Path>) -> Option<PathBuf> {
    let exe_name = if cfg!(windows) {
        format!("{SERVER_BINARY}.exe")
    } else {
        SERVER_BINARY.to_string()
    };
    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(path_var) {
            let candidate = dir.join(&exe_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    if let Some(home) = home {
        let candidate = home.join("llama.cpp").join(&exe_name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let system = Path::new("/usr/local/bin").join(&exe_name);
    system.is_file().then_some(system)
}

pub fn server_launch_args(cfg: &AppConfig, model_path: &Path) -> Vec<String> {
    vec![
        "--model".to_string(),
        model_path.display().to_string(),
        "--port".to_string(),
        cfg.server_port.to_string(),
        "--threads".to_string(),
        cfg.thread_count.to_string(),
        "--ctx-size".to_string(),
        cfg.context_length.to_string(),
        "--host".to_string(),
        cfg.server_host.clone(),
    ]
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub probe_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_attempts: 10,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

pub struct ServerSupervisor {
    runtime_dir: PathBuf,
    probe: Box<dyn HealthProbe>,
    launcher: Box<dyn DetachedLauncher>,
    settings: SupervisorSettings,
    server_binary: Option<PathBuf>,
}

impl ServerSupervisor {
    /// Supervisor with the HTTP probe and the detached process launcher.
    /// Logs and the PID file go under `runtime_dir`.
    pub fn new(runtime_dir: &Path) -> Result<Self> {
        let settings = SupervisorSettings::default();
        Ok(Self::with_parts(
            runtime_dir,
            Box::new(HttpHealthProbe::new(settings.probe_timeout)?),
            Box::new(ProcessLauncher),
            settings,
        ))
    }

    pub fn with_parts(
        runtime_dir: &Path,
        probe: Box<dyn HealthProbe>,
        launcher: Box<dyn DetachedLauncher>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            runtime_dir: runtime_dir.to_path_buf(),
            probe,
            launcher,
            settings,
            server_binary: None,
        }
    }

    /// Use this executable instead of searching for llama-server.
    pub fn with_server_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_binary = Some(path.into());
        self
    }

    pub fn log_path(&self) -> PathBuf {
        self.runtime_dir.join(SERVER_LOG_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.runtime_dir.join(SERVER_PID_FILE)
    }

    /// PID recorded by the most recent launch, if any.
    pub fn recorded_pid(&self) -> Option<u32> {
        fs::read_to_string(self.pid_path())
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }

    pub fn is_healthy(&self, cfg: &AppConfig) -> bool {
        self.probe.is_healthy(&cfg.base_url())
    }

    pub fn ensure_available(&self, cfg: &AppConfig) -> Availability {
        self.ensure_available_with_progress(cfg, |_| {})
    }

    /// Like [`ensure_available`](Self::ensure_available), reporting each step
    /// to `progress`.
    ///
    /// A healthy probe returns immediately, so running this against a live
    /// server never launches a second one. Orphaned servers that do not answer
    /// the probe are not detected.
    pub fn ensure_available_with_progress<F: Fn(&SupervisorProgress)>(
        &self,
        cfg: &AppConfig,
        progress: F,
    ) -> Availability {
        let url = cfg.base_url();
        progress(&SupervisorProgress::Probing { url: url.clone() });
        let healthy = self.probe.is_healthy(&url);
        progress(&SupervisorProgress::Probed {
            url: url.clone(),
            healthy,
        });
        if healthy {
            return Availability::Ready;
        }

        if let Err(reason) = self.launch(cfg, &progress) {
            progress(&SupervisorProgress::Failed {
                reason: reason.clone(),
            });
            return Availability::Failed(reason);
        }

        let max_attempts = self.settings.max_attempts;
        for attempt in 1..=max_attempts {
            if self.probe.is_healthy(&url) {
                progress(&SupervisorProgress::Ready);
                return Availability::Ready;
            }
            progress(&SupervisorProgress::Waiting {
                attempt,
                max_attempts,
            });
            thread::sleep(self.settings.poll_interval);
        }
        let reason = STARTUP_TIMEOUT_REASON.to_string();
        progress(&SupervisorProgress::Failed {
            reason: reason.clone(),
        });
        Availability::Failed(reason)
    }

    fn launch<F: Fn(&SupervisorProgress)>(
        &self,
        cfg: &AppConfig,
        progress: &F,
    ) -> Result<(), String> {
        let model_path = cfg.resolved_model_path(&self.runtime_dir);
        if !model_path.exists() {
            return Err(format!("model not found at {}", model_path.display()));
        }
        let program = self
            .server_binary
            .clone()
            .or_else(resolve_server_binary)
            .ok_or_else(|| {
                format!(
                    "{SERVER_BINARY} not found; install llama.cpp and make sure {SERVER_BINARY} is in your PATH"
                )
            })?;

        fs::create_dir_all(&self.runtime_dir)
            .map_err(|err| format!("cannot create {}: {err}", self.runtime_dir.display()))?;
        let log_path = self.log_path();
        progress(&SupervisorProgress::Launching {
            program: program.clone(),
            log_path: log_path.clone(),
        });
        write_log_line(&log_path, &format!("Starting server at {}", Utc::now().to_rfc3339()), true)
            .map_err(|err| format!("cannot write {}: {err}", log_path.display()))?;

        let spec = LaunchSpec {
            program: program.clone(),
            args: server_launch_args(cfg, &model_path),
            working_dir: self.runtime_dir.clone(),
            log_path: log_path.clone(),
        };
        let pid = self
            .launcher
            .launch(&spec)
            .map_err(|err| format!("failed to launch {}: {err:#}", program.display()))?;

        // Bookkeeping only; a failure here must not mask a successful launch.
        let _ = write_log_line(&log_path, &format!("Server started with PID {pid}"), false);
        let _ = fs::write(self.pid_path(), pid.to_string());
        progress(&SupervisorProgress::Launched {
            program,
            pid,
            log_path,
        });
        Ok(())
    }
}

fn write_log_line(path: &Path, line: &str, truncate: bool) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(!truncate)
        .truncate(truncate)
        .open(path)?;
    writeln!(file, "{line}")
}
