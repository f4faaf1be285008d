use aibuddy_errors::ErrorHandler;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::process::ExitCode;

mod commands;
mod context;
mod output;
mod util;

use commands::admin::{run_config, run_history};
use commands::assist::{run_explain, run_fix, run_generate};
use commands::server::{run_completions, run_server};
use context::AppContext;

#[derive(Parser)]
#[command(name = "aibuddy", version)]
#[command(about = "Turn plain-language requests into shell commands with a local model", long_about = None)]
pub(crate) struct Cli {
    /// Print machine-readable JSON where supported.
    #[arg(long, global = true)]
    json: bool,

    /// Echo diagnostics to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a command from a natural language description.
    Generate(GenerateArgs),
    /// Explain what a command does.
    Explain(CommandArgs),
    /// Run a command and offer a corrected version if it fails.
    Fix(CommandArgs),
    /// Show recently generated commands.
    History(HistoryArgs),
    /// Show or update the configuration.
    Config(ConfigArgs),
    /// Check on, or start, the inference server.
    Server(ServerArgs),
    /// Print a shell completion script.
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub(crate) struct GenerateArgs {
    pub description: String,
    /// Execute the generated command.
    #[arg(short, long)]
    pub execute: bool,
}

#[derive(Args)]
pub(crate) struct CommandArgs {
    /// The command, as separate words or one quoted string.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl CommandArgs {
    pub fn joined(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Args)]
pub(crate) struct HistoryArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args)]
pub(crate) struct ConfigArgs {
    /// Print the configuration without offering to change it.
    #[arg(long)]
    pub show: bool,
}

#[derive(Args)]
pub(crate) struct ServerArgs {
    /// Start the server without asking when it is not running.
    #[arg(long)]
    pub start: bool,
}

#[derive(Args)]
pub(crate) struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", ErrorHandler::new().verbose(verbose).handle(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = cli.command {
        return run_completions(args);
    }
    let ctx = AppContext::load(cli.json, cli.verbose)?;
    match cli.command {
        Commands::Generate(args) => run_generate(&ctx, args),
        Commands::Explain(args) => run_explain(&ctx, args),
        Commands::Fix(args) => run_fix(&ctx, args),
        Commands::History(args) => run_history(&ctx, args),
        Commands::Config(args) => run_config(&ctx, args),
        Commands::Server(args) => run_server(&ctx, args),
        Commands::Completions(_) => Ok(()),
    }
}
