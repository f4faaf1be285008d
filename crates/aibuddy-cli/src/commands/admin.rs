use aibuddy_core::{AppConfig, ConfigStore};
use aibuddy_store::HistoryStore;
use anyhow::Result;
use std::path::PathBuf;

use crate::context::AppContext;
use crate::output::{config_for_display, heading, print_json};
use crate::util::{prompt_value, prompt_yes_no};
use crate::{ConfigArgs, HistoryArgs};

pub(crate) fn run_history(ctx: &AppContext, args: HistoryArgs) -> Result<()> {
    let history = ctx.history();
    ctx.observer
        .verbose_log(&format!("history: {}", history.path().display()));
    let entries = history.recent(args.limit)?;
    if ctx.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No command history found.");
        return Ok(());
    }
    heading("Command History:");
    for (i, entry) in entries.iter().enumerate() {
        println!("{}. \"{}\"", i + 1, entry.description);
        println!("   {}", entry.command);
        println!();
    }
    Ok(())
}

pub(crate) fn run_config(ctx: &AppContext, args: ConfigArgs) -> Result<()> {
    let display = config_for_display(&ctx.cfg, ctx.runtime_dir())?;
    if ctx.json {
        return print_json(&display);
    }
    println!("Current configuration:");
    if let Some(fields) = display.as_object() {
        for (key, value) in fields {
            match value.as_str() {
                Some(text) => println!("{key}: {text}"),
                None => println!("{key}: {value}"),
            }
        }
    }
    if args.show || !prompt_yes_no("Would you like to update the configuration?")? {
        return Ok(());
    }

    let updated = prompt_for_config(&ctx.cfg)?;
    updated.validate()?;
    ctx.store.save(&updated)?;
    println!("Configuration updated!");
    Ok(())
}

fn prompt_for_config(current: &AppConfig) -> Result<AppConfig> {
    let model_path = prompt_value(
        "Model path",
        &current.model_path.display().to_string(),
    )?;
    Ok(AppConfig {
        model_path: PathBuf::from(model_path),
        server_host: prompt_value("Server host", &current.server_host)?,
        server_port: prompt_value("Server port", &current.server_port)?,
        thread_count: prompt_value("Thread count", &current.thread_count)?,
        context_length: prompt_value("Context length", &current.context_length)?,
        command_timeout_seconds: current.command_timeout_seconds,
    })
}
