use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = "history.json";
pub const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub description: String,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn now(description: &str, command: &str) -> Self {
        Self {
            description: description.to_string(),
            command: command.to_string(),
            timestamp: Utc::now(),
        }
    }
}

pub trait HistoryStore {
    fn append(&self, entry: HistoryEntry) -> Result<()>;
    /// Up to `limit` most recent entries, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// Generated commands kept as a pretty JSON array, trimmed to the newest
/// [`HISTORY_CAP`] entries on every append.
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(HISTORY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read history at {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed history at {}", self.path.display()))
    }

    fn write_all(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(entries)?)
            .with_context(|| format!("write history at {}", self.path.display()))
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.push(entry);
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_CAP;
            entries.drain(..excess);
        }
        self.write_all(&entries)
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}
