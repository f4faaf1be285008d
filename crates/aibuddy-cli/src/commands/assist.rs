use aibuddy_agent::repair::executed_event;
use aibuddy_agent::{Assistant, RepairOutcome, RepairStop};
use aibuddy_core::{ExecutionResult, LifecycleEvent};
use aibuddy_store::{HistoryEntry, HistoryStore};
use anyhow::Result;
use serde_json::json;

use crate::context::AppContext;
use crate::output::{failure_heading, heading, print_json};
use crate::util::TerminalApprover;
use crate::{CommandArgs, GenerateArgs};

pub(crate) fn run_generate(ctx: &AppContext, args: GenerateArgs) -> Result<()> {
    let client = ctx.completion_client()?;
    let sink = |event: &LifecycleEvent| ctx.record(event);
    let assistant = Assistant::new(&client).with_events(&sink);

    if !ctx.json {
        println!("Generating command...");
    }
    let command = assistant
        .generate(&args.description)
        .map_err(|err| ctx.lifecycle_failure(&err))?;

    if let Err(err) = ctx
        .history()
        .append(HistoryEntry::now(&args.description, &command))
    {
        ctx.observer.warn_log(&format!("could not save history: {err:#}"));
    }

    if ctx.json && !args.execute {
        return print_json(&json!({
            "description": args.description,
            "command": command,
        }));
    }

    heading("\nGenerated Command:");
    println!("{command}\n");

    if !args.execute {
        return Ok(());
    }
    let executor = ctx.executor()?;
    let mut approver = TerminalApprover;
    let result = executor.run(&command, &mut approver)?;
    print_result("Output:", &result);
    if !result.signals_failure() {
        ctx.record(&executed_event(&command, &result));
        return Ok(());
    }

    let outcome = assistant
        .repair_loop(&executor)
        .ask_before_diagnosing(true)
        .on_diagnosis(|text| println!("\n{text}\n"))
        .repair_after(&command, result, &mut approver)?;
    report_repair(ctx, &outcome)
}

pub(crate) fn run_explain(ctx: &AppContext, args: CommandArgs) -> Result<()> {
    let command = args.joined();
    let client = ctx.completion_client()?;
    let sink = |event: &LifecycleEvent| ctx.record(event);
    if !ctx.json {
        println!("Analyzing command...");
    }
    let explanation = Assistant::new(&client)
        .with_events(&sink)
        .explain(&command)
        .map_err(|err| ctx.lifecycle_failure(&err))?;
    if ctx.json {
        return print_json(&json!({"command": command, "explanation": explanation}));
    }
    println!("\n{explanation}");
    Ok(())
}

pub(crate) fn run_fix(ctx: &AppContext, args: CommandArgs) -> Result<()> {
    let command = args.joined();
    let client = ctx.completion_client()?;
    let sink = |event: &LifecycleEvent| ctx.record(event);
    let assistant = Assistant::new(&client).with_events(&sink);
    let executor = ctx.executor()?;
    let mut approver = TerminalApprover;

    if !ctx.json {
        println!("Attempting to execute command first to see if it has errors...");
    }
    let original = executor.run(&command, &mut approver)?;
    if original.signals_failure() && !ctx.json {
        failure_heading("Command had errors:");
        println!("{}", original.combined_output);
        println!("\nAttempting to fix the command...");
    }

    let json = ctx.json;
    let outcome = assistant
        .repair_loop(&executor)
        .on_diagnosis(|text| {
            if !json {
                println!("\n{text}\n");
            }
        })
        .repair_after(&command, original, &mut approver)?;

    if ctx.json {
        return print_json(&outcome);
    }
    if outcome.stop == RepairStop::NoFailure {
        if outcome.original.is_cancelled() {
            println!("{}", outcome.original.combined_output);
        } else {
            heading("Command executed successfully:");
            println!("{}", outcome.original.combined_output);
        }
        return Ok(());
    }
    report_repair(ctx, &outcome)
}

fn print_result(title: &str, result: &ExecutionResult) {
    heading(&format!("\n{title}"));
    println!("{}", result.combined_output);
}

fn report_repair(ctx: &AppContext, outcome: &RepairOutcome) -> Result<()> {
    if ctx.verbose {
        ctx.observer
            .verbose_log(&format!("repair transitions: {:?}", outcome.transitions));
    }
    match &outcome.stop {
        RepairStop::RepairExecuted => {
            if let Some(repaired) = &outcome.repaired {
                print_result("Output from fixed command:", repaired);
            }
            Ok(())
        }
        RepairStop::ModelFailed { error } => {
            eprintln!("Could not get a fix from the model.\n");
            eprint!("{}", ctx.enhance(error).format(ctx.verbose));
            Ok(())
        }
        RepairStop::NoCandidate => {
            println!("No corrected command found in the response.");
            Ok(())
        }
        RepairStop::NoFailure | RepairStop::DiagnosisDeclined | RepairStop::RepairDeclined => Ok(()),
    }
}
