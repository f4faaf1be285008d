use aibuddy_core::{AppConfig, ConfigStore, FileConfigStore, LifecycleError, LifecycleEvent};
use aibuddy_errors::EnhancedError;
use aibuddy_llm::{LlamaServerClient, ServerSupervisor, SupervisorProgress};
use aibuddy_observe::Observer;
use aibuddy_store::JsonHistoryStore;
use aibuddy_tools::CommandExecutor;
use anyhow::Result;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

/// Everything a subcommand needs, resolved once per invocation.
pub(crate) struct AppContext {
    pub store: FileConfigStore,
    pub cfg: AppConfig,
    pub observer: Rc<Observer>,
    pub json: bool,
    pub verbose: bool,
}

impl AppContext {
    pub fn load(json: bool, verbose: bool) -> Result<Self> {
        let store = FileConfigStore::for_user()?;
        let cfg = store.load()?;
        let mut observer = Observer::new(store.dir())?;
        observer.set_verbose(verbose);
        observer.verbose_log(&format!(
            "config: {}",
            AppConfig::config_path(store.dir()).display()
        ));
        Ok(Self {
            store,
            cfg,
            observer: Rc::new(observer),
            json,
            verbose,
        })
    }

    pub fn runtime_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn history(&self) -> JsonHistoryStore {
        JsonHistoryStore::new(self.runtime_dir())
    }

    pub fn supervisor(&self) -> Result<ServerSupervisor> {
        ServerSupervisor::new(self.runtime_dir())
    }

    /// Completion client whose supervisor progress is echoed to stderr and
    /// recorded in the observe log.
    pub fn completion_client(&self) -> Result<LlamaServerClient> {
        let observer = Rc::clone(&self.observer);
        let show = !self.json;
        Ok(
            LlamaServerClient::new(self.cfg.clone(), self.runtime_dir())?
                .on_progress(move |progress| report_progress(&observer, show, progress)),
        )
    }

    pub fn executor(&self) -> Result<CommandExecutor> {
        let cwd = std::env::current_dir()?;
        let timeout = self.cfg.command_timeout_seconds.map(Duration::from_secs);
        Ok(CommandExecutor::platform(&cwd)?.with_timeout(timeout))
    }

    pub fn record(&self, event: &LifecycleEvent) {
        self.observer.record(event);
    }

    pub fn enhance(&self, err: &LifecycleError) -> EnhancedError {
        EnhancedError::from_lifecycle(err, Some(self.runtime_dir()))
    }

    pub fn lifecycle_failure(&self, err: &LifecycleError) -> anyhow::Error {
        self.enhance(err).into_error()
    }
}

pub(crate) fn report_progress(observer: &Observer, show: bool, progress: &SupervisorProgress) {
    match progress {
        SupervisorProgress::Probing { url } => {
            observer.verbose_log(&format!("probing {url}/health"));
        }
        SupervisorProgress::Probed { url, healthy } => {
            observer.record(&LifecycleEvent::ServerProbe {
                url: url.clone(),
                healthy: *healthy,
            });
            if !healthy && show {
                eprintln!("Inference server is not running at {url}.");
            }
        }
        SupervisorProgress::Launching { program, log_path } => {
            observer.verbose_log(&format!("launching {}", program.display()));
            if show {
                eprintln!("Starting server (output in {})...", log_path.display());
            }
        }
        SupervisorProgress::Launched {
            program,
            pid,
            log_path,
        } => {
            observer.record(&LifecycleEvent::ServerLaunched {
                program: program.clone(),
                pid: *pid,
                log_path: log_path.clone(),
            });
        }
        SupervisorProgress::Waiting {
            attempt,
            max_attempts,
        } => {
            if show {
                eprintln!("Waiting for server to start... ({attempt}/{max_attempts})");
            }
        }
        SupervisorProgress::Ready => {
            if show {
                eprintln!("Server started successfully!");
            }
        }
        SupervisorProgress::Failed { reason } => {
            observer.verbose_log(&format!("server unavailable: {reason}"));
        }
    }
}
