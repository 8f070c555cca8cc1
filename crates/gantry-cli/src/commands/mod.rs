//! CLI command definitions and dispatch.

pub mod plan;
pub mod run;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

/// gantry: boot service containers for integration tests.
#[derive(Parser, Debug)]
#[command(name = "gantry", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the startup order, images and readiness markers of a plan.
    Plan(plan::PlanArgs),
    /// Boot a plan, run a test command against it, then tear it down.
    Run(run::RunArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Plan(args) => plan::execute(&args).map(|()| ExitCode::SUCCESS),
        Command::Run(args) => run::execute(args).await,
    }
}
