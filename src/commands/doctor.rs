use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config;
use crate::config::resolve::locate_config;
use crate::orchestrator::registry::specs_from_config;
use crate::orchestrator::setup::{run_step, StepFailure};

/// Run every `[setup] toolchain` command and check each service directory.
pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let location = locate_config(config_file)?;
    let config = config::load_checked(&location)?;

    println!("devcycle doctor");
    println!("===============");
    println!();

    let mut problems = 0;
    if config.setup.toolchain.is_empty() {
        println!("  no toolchain commands configured");
    }
    for command in &config.setup.toolchain {
        match run_step(command, &location.dir, &config.env, config.timing.setup_step_timeout).await {
            Ok(version) => {
                let version = version.lines().last().unwrap_or("").trim().to_string();
                println!("  {} {:<20} {}", "[ok]".green(), command, version);
            }
            Err(e) => {
                problems += 1;
                println!("  {} {:<20} {}", "[!!]".red(), command, failure_text(&e));
            }
        }
    }

    println!();
    for spec in specs_from_config(&config, &location) {
        if spec.dir.is_dir() {
            println!("  {} {:<20} {}", "[ok]".green(), spec.name, spec.dir.display());
        } else if spec.required {
            problems += 1;
            println!("  {} {:<20} missing {}", "[!!]".red(), spec.name, spec.dir.display());
        } else {
            println!(
                "  {} {:<20} missing {} (optional, will be disabled)",
                "[--]".yellow(),
                spec.name,
                spec.dir.display()
            );
        }
    }

    println!();
    if problems == 0 {
        println!("Everything needed is in place.");
        Ok(())
    } else {
        anyhow::bail!("{} problem(s) found", problems)
    }
}

fn failure_text(e: &StepFailure) -> String {
    match e {
        StepFailure::Failed { .. } | StepFailure::Timeout(_) => e.to_string(),
        StepFailure::Spawn(_) => "not found".to_string(),
    }
}
