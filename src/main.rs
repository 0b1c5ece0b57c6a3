use is_terminal::IsTerminal;

use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use devcycle::cli::{Cli, Commands};
use devcycle::commands;
use devcycle::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_file = cli.global.config_file.as_deref();

    let result = match &cli.command {
        None => commands::run::run(config_file, cli.first_mode())
            .await
            .map(|_| ()),
        Some(command) => {
            logging::init(None);
            match command {
                Commands::Validate => commands::validate::run(config_file),
                Commands::Doctor => commands::doctor::run(config_file).await,
                Commands::Init => commands::init::run(),
                Commands::Completions { shell } => {
                    generate(*shell, &mut Cli::command(), "devcycle", &mut std::io::stdout());
                    Ok(())
                }
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        if cli.command.is_none() {
            wait_for_enter();
        }
        std::process::exit(1);
    }
}

/// Keep a terminal window that was opened just for this run on screen
/// until the user has read the error.
fn wait_for_enter() {
    if !std::io::stdin().is_terminal() {
        return;
    }
    eprintln!("Press Enter to exit...");
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
