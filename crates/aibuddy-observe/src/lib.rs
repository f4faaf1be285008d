use aibuddy_core::{EventEnvelope, LifecycleEvent};
use anyhow::Result;
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const OBSERVE_LOG_FILE: &str = "observe.log";

pub struct Observer {
    log_path: PathBuf,
    verbose: bool,
}

impl Observer {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            log_path: dir.join(OBSERVE_LOG_FILE),
            verbose: false,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn record_event(&self, event: &LifecycleEvent) -> Result<()> {
        let envelope = EventEnvelope::now(event.clone());
        self.append_log_line(&format!(
            "{} EVENT {}",
            envelope.at.to_rfc3339(),
            serde_json::to_string(&envelope.event)?
        ))
    }

    /// Infallible variant of [`record_event`](Self::record_event) for use as
    /// an event sink; write failures only show up in verbose mode.
    pub fn record(&self, event: &LifecycleEvent) {
        if let Err(err) = self.record_event(event) {
            self.verbose_log(&format!("failed to write {}: {err}", self.log_path.display()));
        }
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log a message to stderr with `[aibuddy]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[aibuddy] {msg}");
        }
    }

    /// Always written to stderr and the log file.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[aibuddy WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn events_are_appended_as_json_lines() {
        let dir = TempDir::new().expect("tempdir");
        let observer = Observer::new(dir.path()).expect("observer");
        observer
            .record_event(&LifecycleEvent::ServerProbe {
                url: "http://localhost:8080".to_string(),
                healthy: false,
            })
            .expect("record");
        observer.record(&LifecycleEvent::CommandExecuted {
            command: "ls".to_string(),
            exit_status: 0,
            failed: false,
        });

        let log = fs::read_to_string(observer.log_path()).expect("log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        let (_, json) = lines[0].split_once(" EVENT ").expect("event marker");
        let value: serde_json::Value = serde_json::from_str(json).expect("json");
        assert_eq!(value["type"], "server_probe");
        assert_eq!(value["healthy"], false);
        assert!(lines[1].contains(r#""command":"ls""#));
    }

    #[test]
    fn warnings_land_in_log() {
        let dir = TempDir::new().expect("tempdir");
        let observer = Observer::new(&dir.path().join("nested")).expect("observer");
        observer.warn_log("config dir not writable");
        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.trim_end().ends_with("WARN config dir not writable"));
    }

    #[test]
    fn verbose_flag_toggles() {
        let dir = TempDir::new().expect("tempdir");
        let mut observer = Observer::new(dir.path()).expect("observer");
        assert!(!observer.is_verbose());
        observer.set_verbose(true);
        assert!(observer.is_verbose());
    }
}
