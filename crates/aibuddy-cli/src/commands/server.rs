use aibuddy_core::{LifecycleError, LifecycleEvent};
use aibuddy_llm::Availability;
use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use serde_json::json;
use std::io;

use crate::context::{AppContext, report_progress};
use crate::output::print_json;
use crate::util::prompt_yes_no;
use crate::{Cli, CompletionsArgs, ServerArgs};

pub(crate) fn run_server(ctx: &AppContext, args: ServerArgs) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    let url = ctx.cfg.base_url();
    let running = supervisor.is_healthy(&ctx.cfg);
    ctx.record(&LifecycleEvent::ServerProbe {
        url: url.clone(),
        healthy: running,
    });

    if ctx.json && !args.start {
        return print_json(&json!({
            "url": url,
            "running": running,
            "pid": supervisor.recorded_pid(),
            "log_path": supervisor.log_path(),
        }));
    }

    if running {
        if ctx.json {
            return print_json(&json!({"url": url, "running": true}));
        }
        println!("Server is running at {url}");
        if let Some(pid) = supervisor.recorded_pid() {
            println!("Last launched PID: {pid}");
        }
        return Ok(());
    }

    if !ctx.json {
        println!("Server is not running.");
    }
    if !args.start && !prompt_yes_no("Would you like to start the server?")? {
        return Ok(());
    }

    let observer = &ctx.observer;
    let show = !ctx.json;
    let availability = supervisor
        .ensure_available_with_progress(&ctx.cfg, |progress| report_progress(observer, show, progress));
    match availability {
        Availability::Ready => {
            if ctx.json {
                print_json(&json!({
                    "url": url,
                    "running": true,
                    "pid": supervisor.recorded_pid(),
                }))?;
            }
            Ok(())
        }
        Availability::Failed(reason) => {
            ctx.record(&LifecycleEvent::ServerUnavailable {
                reason: reason.clone(),
            });
            Err(ctx.lifecycle_failure(&LifecycleError::Unreachable { reason }))
        }
    }
}

pub(crate) fn run_completions(args: CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "aibuddy", &mut io::stdout());
    Ok(())
}
