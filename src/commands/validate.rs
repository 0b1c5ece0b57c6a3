use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

use crate::config;
use crate::config::resolve::locate_config;

pub fn run(config_file: Option<&Path>) -> Result<()> {
    let location = locate_config(config_file)?;
    let config = config::load_checked(&location)?;

    let enabled = config.services.values().filter(|s| s.enabled).count();
    println!(
        "  {} {} is valid ({} services, {} enabled{})",
        "\u{2713}".green(),
        location.path.display(),
        config.services.len(),
        enabled,
        if config.tool.is_some() { ", tool" } else { "" },
    );
    Ok(())
}
