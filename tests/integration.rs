#![cfg(feature = "integration")]

mod common;

#[path = "integration/cli_commands.rs"]
mod cli_commands;
#[path = "integration/completions.rs"]
mod completions;
#[cfg(unix)]
#[path = "integration/port_reclaim.rs"]
mod port_reclaim;
#[cfg(unix)]
#[path = "integration/run_lifecycle.rs"]
mod run_lifecycle;
