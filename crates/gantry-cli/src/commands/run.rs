//! `gantry run`: boot a plan, run the test command, tear everything down.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use gantry_common::constants::DEFAULT_VERSIONS_URL;
use gantry_harness::teardown::TeardownReport;
use gantry_harness::{Endpoints, Orchestrator, Plan, RunOutcome};
use gantry_runtime::backend::docker::DockerRuntime;
use tokio::process::Command;

use crate::output::{BOLD, CYAN, DIM, GREEN, RED, RESET, YELLOW, format_duration};
use crate::versions::VersionClient;

/// Exit code reported when the test command cannot be spawned.
const SPAWN_FAILED_EXIT_CODE: i32 = 127;
/// Exit code reported when the run is interrupted with Ctrl+C, during
/// startup or while the test command runs.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the plan file.
    pub file: PathBuf,

    /// Use locally built images and never pull.
    #[arg(long, env = "TEST_LOCAL", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub local: bool,

    /// Echo container output through the logger.
    #[arg(long, env = "SHOW_CONTAINERS_OUTPUT", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub show_output: bool,

    /// Bearer token for the version service.
    #[arg(long, env = "ARTIFACTZ_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the version service.
    #[arg(long, env = "GANTRY_VERSIONS_URL", default_value = DEFAULT_VERSIONS_URL)]
    pub versions_url: String,

    /// Readiness budget per service, in seconds.
    #[arg(long, env = "GANTRY_READY_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Host name used in endpoint URLs instead of the engine's.
    #[arg(long)]
    pub endpoint_host: Option<String>,

    /// Test command, run once every service is ready.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The test command's exit code becomes the process exit code.
///
/// # Errors
///
/// Returns an error if the plan is invalid, versions cannot be resolved,
/// the engine is unreachable, or the services fail to start.
pub async fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let started = Instant::now();
    print_header();

    let mut plan = Plan::load(&args.file)
        .with_context(|| format!("failed to load plan {}", args.file.display()))?;
    apply_overrides(&mut plan, &args);

    let versions = resolve_versions(&plan, &args).await?;
    let services = plan.service_specs(&versions)?;

    let mut runtime = DockerRuntime::connect()?;
    if let Some(host) = &args.endpoint_host {
        runtime = runtime.with_host(host.clone());
    }
    runtime
        .ping()
        .await
        .context("container engine is not reachable")?;

    eprintln!(
        "  Starting {BOLD}{}{RESET} service(s) from {DIM}{}{RESET}",
        services.len(),
        args.file.display()
    );
    let mut orchestrator = Orchestrator::new(Arc::new(runtime), plan.settings.clone());
    let startup = tokio::select! {
        result = orchestrator.start(&services) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let endpoints = match startup {
        Some(result) => result?,
        None => {
            eprintln!();
            eprintln!("  {YELLOW}Interrupted during startup.{RESET} Tearing down...");
            let teardown = orchestrator.shutdown().await;
            report_teardown(&teardown, started);
            return Ok(exit_code(INTERRUPTED_EXIT_CODE));
        }
    };

    let command = args.command;
    let outcome = orchestrator
        .run_started(endpoints, |endpoints| run_tests(command, endpoints))
        .await;

    report(&outcome, started);
    Ok(exit_code(outcome.exit_code))
}

fn apply_overrides(plan: &mut Plan, args: &RunArgs) {
    if args.local {
        plan.settings.local_images = true;
    }
    if args.show_output {
        plan.settings.show_output = true;
    }
    if let Some(secs) = args.timeout {
        plan.settings.ready_timeout_secs = secs;
    }
}

async fn resolve_versions(plan: &Plan, args: &RunArgs) -> anyhow::Result<HashMap<String, String>> {
    let artifacts = plan.artifacts();
    if artifacts.is_empty() {
        return Ok(HashMap::new());
    }
    if args.token.is_none() {
        eprintln!("  {YELLOW}Note:{RESET} no ARTIFACTZ_TOKEN set; querying versions anonymously.");
    }
    let client = VersionClient::new(&args.versions_url, args.token.clone())?;
    client
        .fetch(&artifacts)
        .await
        .context("failed to resolve artifact versions")
}

async fn run_tests(command: Vec<String>, endpoints: Endpoints) -> i32 {
    print_endpoints(&endpoints);

    let Some((program, rest)) = command.split_first() else {
        return SPAWN_FAILED_EXIT_CODE;
    };
    eprintln!();
    eprintln!("  {CYAN}Running:{RESET} {BOLD}{}{RESET}", command.join(" "));
    eprintln!();

    let spawned = Command::new(program)
        .args(rest)
        .envs(endpoints.env_vars())
        .stdin(Stdio::inherit())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(program = %program, error = %e, "failed to spawn test command");
            return SPAWN_FAILED_EXIT_CODE;
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                tracing::error!(error = %e, "failed to wait for test command");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, stopping test command");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill test command");
            }
            INTERRUPTED_EXIT_CODE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}gantry{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

fn print_endpoints(endpoints: &Endpoints) {
    eprintln!();
    eprintln!("  {GREEN}{BOLD}All services ready.{RESET}");
    eprintln!();
    for (service, url) in endpoints.iter() {
        eprintln!(
            "    {GREEN}●{RESET} {BOLD}{service}{RESET} {CYAN}->{RESET} {url} {DIM}({}){RESET}",
            gantry_harness::endpoints::env_var_name(service)
        );
    }
}

fn report(outcome: &RunOutcome, started: Instant) {
    report_teardown(&outcome.teardown, started);
    if outcome.exit_code == 0 {
        eprintln!("  {GREEN}Tests passed.{RESET}");
    } else {
        eprintln!("  {RED}Tests failed{RESET} (exit code {}).", outcome.exit_code);
    }
}

fn report_teardown(teardown: &TeardownReport, started: Instant) {
    eprintln!();
    eprintln!(
        "  Released {} resource(s) in {}.",
        teardown.released().len(),
        format_duration(started.elapsed())
    );
    for failure in teardown.failures() {
        eprintln!("    {YELLOW}!{RESET} {failure}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> RunArgs {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            run: RunArgs,
        }

        let mut argv = vec!["gantry", "plan.yaml"];
        argv.extend_from_slice(extra);
        argv.extend_from_slice(&["--", "true"]);
        Wrapper::try_parse_from(argv).expect("valid arguments").run
    }

    #[test]
    fn flags_override_plan_settings() {
        let mut plan = Plan::parse(
            "settings:\n  ready_timeout_secs: 10\nservices:\n  - name: web\n    image: nginx\n    ports: [\"80/tcp\"]\n",
        )
        .expect("valid plan");
        apply_overrides(&mut plan, &args(&["--local", "--show-output", "--timeout", "3"]));
        assert!(plan.settings.local_images);
        assert!(plan.settings.show_output);
        assert_eq!(plan.settings.ready_timeout_secs, 3);
    }

    #[test]
    fn absent_flags_keep_plan_settings() {
        let mut plan = Plan::parse(
            "settings:\n  show_output: true\n  ready_timeout_secs: 10\nservices:\n  - name: web\n    image: nginx\n    ports: [\"80/tcp\"]\n",
        )
        .expect("valid plan");
        apply_overrides(&mut plan, &args(&[]));
        assert!(plan.settings.show_output);
        assert_eq!(plan.settings.ready_timeout_secs, 10);
    }

    #[test]
    fn exit_codes_outside_u8_become_failure() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(-1), ExitCode::FAILURE);
        assert_eq!(exit_code(256), ExitCode::FAILURE);
    }

    #[tokio::test]
    async fn test_command_sees_endpoint_variables() {
        let mut endpoints = Endpoints::new();
        endpoints.insert("policy", "http://localhost:49154");
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "test \"$GANTRY_POLICY_URL\" = http://localhost:49154".to_string(),
        ];
        assert_eq!(run_tests(command, endpoints).await, 0);
    }

    #[tokio::test]
    async fn test_command_exit_code_is_passed_through() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        assert_eq!(run_tests(command, Endpoints::new()).await, 3);
    }

    #[tokio::test]
    async fn missing_program_reports_spawn_failure() {
        let command = vec!["gantry-no-such-program".to_string()];
        assert_eq!(
            run_tests(command, Endpoints::new()).await,
            SPAWN_FAILED_EXIT_CODE
        );
    }
}
