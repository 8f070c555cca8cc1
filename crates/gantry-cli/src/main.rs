//! # gantry: integration-test harness CLI
//!
//! Boots the services of a plan onto a private network, waits for them to
//! become ready, runs a test command against their endpoints, and tears
//! everything down again.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;
mod versions;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::{Cli, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match commands::execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}error:{} {e:#}", output::RED, output::RESET);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
