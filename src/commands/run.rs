use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config;
use crate::config::resolve::locate_config;
use crate::logging::{self, RunLog};
use crate::orchestrator::listener::terminal_keys;
use crate::orchestrator::ports::SystemDiscovery;
use crate::orchestrator::process::OutputSink;
use crate::orchestrator::registry::{specs_from_config, ServiceRegistry};
use crate::orchestrator::setup::CommandPipeline;
use crate::orchestrator::signal::RebootMode;
use crate::orchestrator::{RunReport, Supervisor, SupervisorSettings};
use crate::ui::logs::LogWriter;

const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Supervise the configured services until quit, Ctrl-C or a fatal setup
/// failure.
pub async fn run(config_file: Option<&Path>, mode: RebootMode) -> Result<RunReport> {
    let location = locate_config(config_file)?;
    let config = config::load_checked(&location)?;

    let log_path = location.resolve(&config.project.log_file);
    let run_log = match RunLog::create(&log_path) {
        Ok(run_log) => Some(run_log),
        Err(e) => {
            eprintln!("cannot write run log {}: {}", log_path.display(), e);
            None
        }
    };
    logging::init(run_log.clone());
    info!(config = %location.path.display(), %mode, "devcycle {}", env!("CARGO_PKG_VERSION"));

    let specs = specs_from_config(&config, &location);
    let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
    let mut writer = LogWriter::new(rx, specs.iter().map(|s| s.name.as_str()));
    if let Some(run_log) = run_log {
        writer = writer.with_run_log(run_log);
    }
    let writer = tokio::spawn(writer.run());

    let registry = Arc::new(ServiceRegistry::new(specs, OutputSink::new(tx)));
    let pipeline = CommandPipeline::new(
        config.setup.clone(),
        location.dir.clone(),
        config.timing.setup_step_timeout,
    );
    let settings = SupervisorSettings::from_config(&config, &location, mode, log_path);
    let supervisor = Supervisor::new(registry, pipeline, SystemDiscovery, terminal_keys(), settings);

    let interrupt = supervisor.interrupt_handle();
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, stopping");
            interrupt.notify_one();
        }
    });

    let result = supervisor.run().await;
    ctrl_c.abort();
    // The registry, and with it the last sender, is gone once run returns.
    if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
        warn!("output writer did not finish");
    }

    result
        .inspect_err(|e| error!("{}", e))
        .context("setup failed")
}
