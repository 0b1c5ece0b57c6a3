use std::io::Write;
use std::path::PathBuf;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::orchestrator::registry::{ServiceRegistry, ServiceState};
use crate::orchestrator::setup::ToolVersion;
use crate::orchestrator::signal::RebootMode;

/// Static facts shown in the banner.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub project: String,
    pub log_path: PathBuf,
    pub tool_name: Option<String>,
}

fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

pub fn clear_screen() {
    print!("\x1B[2J\x1B[3J\x1B[H");
    let _ = std::io::stdout().flush();
}

fn key(label: &str, color: bool) -> String {
    if color {
        format!("{}", format!("[{}]", label).green())
    } else {
        format!("[{}]", label)
    }
}

/// The banner: project, enabled services, mode, log file and key legend.
pub fn print_header(info: &HeaderInfo, registry: &ServiceRegistry, mode: RebootMode) {
    let color = use_color();
    let rule = "=".repeat(60);

    let enabled: Vec<String> = registry
        .specs()
        .filter(|s| registry.is_enabled(&s.id))
        .map(|s| format!("{} (:{})", s.name, s.port))
        .collect();
    let enabled = if enabled.is_empty() {
        "none".to_string()
    } else {
        enabled.join(" | ")
    };
    let mode_text = match (mode, color) {
        (RebootMode::Full, true) => format!("{}", "FULL".yellow()),
        (RebootMode::Fast, true) => format!("{}", "FAST".green()),
        (RebootMode::Full, false) => "FULL".to_string(),
        (RebootMode::Fast, false) => "FAST".to_string(),
    };

    println!();
    if color {
        println!("  {}", rule.cyan());
        println!("  {} {}", "devcycle".bold(), info.project.cyan());
        println!("  {}", rule.cyan());
    } else {
        println!("  {}", rule);
        println!("  devcycle {}", info.project);
        println!("  {}", rule);
    }
    println!("  Started:  {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("  Services: {}", enabled);
    println!("  Mode:     {} (pass --fast to skip provisioning)", mode_text);
    println!("  Log:      {}", info.log_path.display());
    println!();
    println!("  Keys (while services are running):");
    println!("    {} Reboot       full restart with setup", key("R", color));
    println!("    {} Fast reboot  restart, keep caches, skip setup", key("F", color));
    println!("    {} Open         open the main service in a browser", key("O", color));
    if let Some(tool) = &info.tool_name {
        println!("    {} Tool         start {}", key("P", color), tool);
    }
    println!("    {} Datastore    check the datastore connection", key("D", color));
    println!("    {} Clear        clear the screen (Shift+C)", key("C", color));
    println!("    {} Quit         stop everything and exit", key("Q", color));
    println!("    Ctrl+C           force stop and exit");
    println!();
    for (i, spec) in registry.specs().enumerate() {
        println!(
            "    {} Toggle {} (port {})",
            key(&(i + 1).to_string(), color),
            spec.name,
            spec.port
        );
    }
    println!("  {}", rule);
    println!();
}

/// Tool versions found by the toolchain check and the enabled services.
pub fn print_system_info(versions: &[ToolVersion], registry: &ServiceRegistry) {
    if versions.is_empty() {
        return;
    }
    println!();
    println!("  OS:       {}", std::env::consts::OS);
    for v in versions {
        let version = v.version.lines().last().unwrap_or("").trim();
        println!("  {:<9} {}", format!("{}:", first_word(&v.command)), version);
    }
    let services: Vec<String> = registry
        .specs()
        .filter(|s| registry.is_enabled(&s.id))
        .map(|s| format!("{} (:{})", s.name, s.port))
        .collect();
    println!("  Services: {}", services.join(", "));
    println!();
}

fn first_word(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

fn status_text(state: Option<ServiceState>, enabled: bool, color: bool) -> String {
    let text = match state {
        _ if !enabled => "disabled".to_string(),
        Some(s) => s.to_string(),
        None => "unknown".to_string(),
    };
    if !color {
        return format!("\u{25cf} {}", text);
    }
    match state {
        _ if !enabled => format!("{} {}", "\u{25cf}".dimmed(), text.dimmed()),
        Some(ServiceState::Running) | Some(ServiceState::Starting) => {
            format!("{} {}", "\u{25cf}".green(), text.green())
        }
        Some(ServiceState::Exited(_)) => format!("{} {}", "\u{25cf}".red(), text.red()),
        _ => format!("{} {}", "\u{25cf}".yellow(), text.yellow()),
    }
}

/// Table of every service with its URL, state and pid.
pub fn print_running_summary(registry: &ServiceRegistry) {
    let color = use_color();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("#").set_alignment(CellAlignment::Right),
        Cell::new("Service").set_alignment(CellAlignment::Left),
        Cell::new("URL").set_alignment(CellAlignment::Left),
        Cell::new("Status").set_alignment(CellAlignment::Center),
        Cell::new("PID").set_alignment(CellAlignment::Right),
    ]);

    for (i, spec) in registry.specs().enumerate() {
        let enabled = registry.is_enabled(&spec.id);
        let pid = registry
            .handle_info(&spec.id)
            .and_then(|h| h.pid)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&spec.name),
            Cell::new(spec.url()),
            Cell::new(status_text(registry.state(&spec.id), enabled, color)),
            Cell::new(pid),
        ]);
    }

    println!();
    for line in table.to_string().lines() {
        println!("  {}", line);
    }
    println!();
    if color {
        println!(
            "  Press {} to reboot, {} for a fast reboot, {} to quit",
            "R".bold(),
            "F".bold(),
            "Q".bold()
        );
    } else {
        println!("  Press R to reboot, F for a fast reboot, Q to quit");
    }
    println!();
}
