use aibuddy_core::AppConfig;
use anyhow::Result;
use crossterm::style::{Stylize, style};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn heading(text: &str) {
    println!("{}", style(text).green().bold());
}

pub(crate) fn failure_heading(text: &str) {
    println!("{}", style(text).red().bold());
}

/// Config as stored, plus the paths it resolves to on this machine.
pub(crate) fn config_for_display(cfg: &AppConfig, dir: &Path) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(map) = value.as_object_mut() {
        map.insert(
            "resolved_model_path".to_string(),
            json!(cfg.resolved_model_path(dir)),
        );
        map.insert(
            "config_path".to_string(),
            json!(AppConfig::config_path(dir)),
        );
    }
    Ok(value)
}
