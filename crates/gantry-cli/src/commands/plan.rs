//! `gantry plan`: show how a plan would start, without starting it.

use std::path::PathBuf;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args};
use gantry_harness::Plan;
use gantry_harness::plan::ServiceEntry;

use crate::output::{BOLD, CYAN, DIM, RESET, YELLOW};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the plan file.
    pub file: PathBuf,

    /// Show the images used in local mode.
    #[arg(long, env = "TEST_LOCAL", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub local: bool,

    /// Print the plan as JSON, services in startup order.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the plan cannot be loaded or is invalid.
pub fn execute(args: &PlanArgs) -> anyhow::Result<()> {
    let mut plan = Plan::load(&args.file)
        .with_context(|| format!("failed to load plan {}", args.file.display()))?;
    if args.local {
        plan.settings.local_images = true;
    }

    let ordered: Vec<ServiceEntry> = plan.startup_order()?.into_iter().cloned().collect();

    if args.json {
        let ordered_plan = Plan {
            settings: plan.settings.clone(),
            services: ordered,
        };
        println!("{}", serde_json::to_string_pretty(&ordered_plan)?);
        return Ok(());
    }

    println!(
        "{BOLD}Startup order{RESET} {DIM}({} services, network prefix {}, {}s readiness budget){RESET}",
        ordered.len(),
        plan.settings.network_prefix,
        plan.settings.ready_timeout_secs
    );
    for (i, entry) in ordered.iter().enumerate() {
        println!("  {}. {BOLD}{}{RESET}", i + 1, entry.name);
        println!("     image:   {}", image_label(entry, plan.settings.local_images));
        if !entry.ports.is_empty() {
            let ports: Vec<String> = entry.ports.iter().map(ToString::to_string).collect();
            println!("     ports:   {}", ports.join(", "));
        }
        match entry.ready_marker.as_deref().filter(|m| !m.is_empty()) {
            Some(marker) => println!("     ready:   {CYAN}\"{marker}\"{RESET}"),
            None => println!("     ready:   {DIM}immediately{RESET}"),
        }
        if !entry.depends_on.is_empty() {
            println!("     after:   {}", entry.depends_on.join(", "));
        }
    }

    let artifacts = plan.artifacts();
    if !artifacts.is_empty() {
        println!();
        println!(
            "{YELLOW}Versions resolved at run time for:{RESET} {}",
            artifacts.join(", ")
        );
    }
    Ok(())
}

fn image_label(entry: &ServiceEntry, local: bool) -> String {
    if local {
        let image = entry.local_image.as_deref().unwrap_or(&entry.image);
        return format!("{image} {DIM}(local){RESET}");
    }
    match &entry.artifact {
        Some(artifact) => format!("{}:<{artifact}>", entry.image),
        None => entry.image.clone(),
    }
}
