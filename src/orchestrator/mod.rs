pub mod listener;
pub mod ports;
pub mod process;
pub mod ready;
pub mod registry;
pub mod setup;
pub mod signal;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::actions::{browser, datastore};
use crate::config::model::{DatastoreConfig, DevcycleConfig, TimingConfig};
use crate::config::resolve::ConfigLocation;
use crate::ui::summary::{self, HeaderInfo};

use listener::{CommandHandler, CommandListener, KeySourceFactory, ListenerError};
use ports::{PortReaper, ProcessDiscovery};
use ready::ReadinessProbe;
use registry::{ServiceRegistry, ToolSpec, ToolStart};
use setup::{prepare_service, ServiceSetup, SetupError, SetupPipeline, ToolVersion};
use signal::{RebootMode, Signal, SupervisorSignal};

/// How long shutdown waits for the last lines of child output.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Opens a URL in a browser. Swapped out in tests.
pub type Opener = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Where a cycle is. Every transition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Setup,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Setup => "setup",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Reboot(RebootMode),
    Quit,
    /// Every started service exited on its own.
    AllExited,
    /// Nothing was enabled when the cycle reached Running.
    NoServices,
    /// Ctrl-C.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub number: usize,
    pub mode: RebootMode,
    pub phases: Vec<Phase>,
    /// Ports confirmed free during Init.
    pub reclaimed: Vec<u16>,
    /// Filled on the first cycle only.
    pub toolchain: Vec<ToolVersion>,
    pub setup: Vec<(String, ServiceSetup)>,
    pub started: Vec<String>,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(number: usize, mode: RebootMode) -> Self {
        Self {
            number,
            mode,
            phases: Vec::new(),
            reclaimed: Vec::new(),
            toolchain: Vec::new(),
            setup: Vec::new(),
            started: Vec::new(),
            outcome: CycleOutcome::Quit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub cycles: Vec<CycleReport>,
}

impl RunReport {
    pub fn last_outcome(&self) -> Option<CycleOutcome> {
        self.cycles.last().map(|c| c.outcome)
    }
}

/// Everything the supervisor needs from the config besides the services.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub project: String,
    pub first_mode: RebootMode,
    pub primary: Option<String>,
    pub open_browser: bool,
    pub browser: Option<String>,
    pub datastore: DatastoreConfig,
    /// Directory the datastore env file is read from.
    pub datastore_dir: PathBuf,
    pub tool: Option<ToolSpec>,
    pub timing: TimingConfig,
    pub log_path: PathBuf,
}

impl SupervisorSettings {
    pub fn from_config(
        config: &DevcycleConfig,
        location: &ConfigLocation,
        first_mode: RebootMode,
        log_path: PathBuf,
    ) -> Self {
        let primary = config.primary_service().map(str::to_string);
        let datastore_dir = primary
            .as_deref()
            .and_then(|id| config.services.get(id))
            .map(|svc| location.resolve(svc.path.as_deref().unwrap_or(".")))
            .unwrap_or_else(|| location.dir.clone());
        Self {
            project: config.project.name.clone(),
            first_mode,
            primary,
            open_browser: config.project.open_browser,
            browser: config.project.browser.clone(),
            datastore: config.datastore.clone(),
            datastore_dir,
            tool: config
                .tool
                .as_ref()
                .map(|tool| ToolSpec::from_config(tool, &config.env, location)),
            timing: config.timing,
            log_path,
        }
    }
}

/// Drives the services through repeated cycles of
/// `Init -> Setup -> Running -> Draining` until a cycle ends in anything
/// other than a reboot.
///
/// The monitoring loop and the key listener share only the signal and the
/// registry. Ctrl-C arrives through `interrupt`: it abandons Setup or
/// Running, drains, and ends the run.
pub struct Supervisor<P, D> {
    registry: Arc<ServiceRegistry>,
    pipeline: P,
    reaper: PortReaper<D>,
    probe: ReadinessProbe,
    signal: Arc<SupervisorSignal>,
    keys: KeySourceFactory,
    opener: Opener,
    interrupt: Arc<Notify>,
    settings: SupervisorSettings,
}

impl<P: SetupPipeline, D: ProcessDiscovery> Supervisor<P, D> {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        pipeline: P,
        discovery: D,
        keys: KeySourceFactory,
        settings: SupervisorSettings,
    ) -> Self {
        let timing = settings.timing;
        let browser_command = settings.browser.clone();
        Self {
            registry,
            pipeline,
            reaper: PortReaper::new(discovery, timing.port_release),
            probe: ReadinessProbe::new(timing.ready_poll, timing.ready_connect),
            signal: Arc::new(SupervisorSignal::new()),
            keys,
            opener: Arc::new(move |url: &str| browser::open_url(url, browser_command.as_deref())),
            interrupt: Arc::new(Notify::new()),
            settings,
        }
    }

    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = opener;
        self
    }

    /// Handle used to interrupt the run, e.g. from a Ctrl-C task.
    pub fn interrupt_handle(&self) -> Arc<Notify> {
        self.interrupt.clone()
    }

    pub fn signal(&self) -> Arc<SupervisorSignal> {
        self.signal.clone()
    }

    /// Run cycles until quit, all services exit, or Ctrl-C. A fatal setup
    /// failure ends the run with the error.
    pub async fn run(self) -> Result<RunReport, SetupError> {
        self.disable_missing_optional();
        let mut report = RunReport::default();
        let mut mode = self.settings.first_mode;

        for number in 1.. {
            let cycle = self.cycle(number, mode).await?;
            let outcome = cycle.outcome;
            report.cycles.push(cycle);

            let CycleOutcome::Reboot(next) = outcome else {
                break;
            };
            info!("rebooting in {} mode", next);
            if !self.pause(self.settings.timing.reboot_pause).await {
                if let Some(last) = report.cycles.last_mut() {
                    last.outcome = CycleOutcome::Interrupted;
                }
                break;
            }
            mode = next;
        }

        info!(phase = %Phase::Stopped, "all services stopped");
        Ok(report)
    }

    async fn cycle(&self, number: usize, mode: RebootMode) -> Result<CycleReport, SetupError> {
        let mut report = CycleReport::new(number, mode);
        let ports = self.managed_ports();

        enter(&mut report, Phase::Init);
        self.signal.reset();
        report.reclaimed = self
            .reaper
            .reclaim_all(&ports)
            .await
            .into_iter()
            .map(|freed| freed.port)
            .collect();
        summary::print_header(&self.header(), &self.registry, mode);

        enter(&mut report, Phase::Setup);
        let interrupted = tokio::select! {
            result = self.setup(number, mode) => {
                let (toolchain, services) = result?;
                report.toolchain = toolchain;
                report.setup = services;
                false
            }
            _ = self.interrupt.notified() => {
                warn!("interrupted during setup");
                true
            }
        };

        let mut tasks = CycleTasks::default();
        report.outcome = if interrupted {
            self.signal.request(Signal::Quit);
            CycleOutcome::Interrupted
        } else {
            enter(&mut report, Phase::Running);
            self.running(mode, &mut report, &mut tasks).await
        };
        debug!(cycle = number, outcome = ?report.outcome, "cycle ended");

        enter(&mut report, Phase::Draining);
        self.drain(tasks, &ports).await;
        Ok(report)
    }

    async fn setup(
        &self,
        number: usize,
        mode: RebootMode,
    ) -> Result<(Vec<ToolVersion>, Vec<(String, ServiceSetup)>), SetupError> {
        let mut toolchain = Vec::new();
        if number == 1 {
            toolchain = self.pipeline.check_toolchain().await?;
            summary::print_system_info(&toolchain, &self.registry);
        }

        if mode == RebootMode::Full && self.settings.datastore.check {
            let status = datastore::check(
                &self.settings.datastore,
                &self.settings.datastore_dir,
                self.settings.timing.datastore_timeout,
            )
            .await;
            datastore::report(&status, &self.settings.datastore);
        }

        let mut services = Vec::new();
        for id in self.registry.enabled_ids() {
            let Some(spec) = self.registry.spec(&id) else {
                continue;
            };
            let outcome = prepare_service(&self.pipeline, spec, mode).await?;
            services.push((id, outcome));
        }
        Ok((toolchain, services))
    }

    async fn running(&self, mode: RebootMode, report: &mut CycleReport, tasks: &mut CycleTasks) -> CycleOutcome {
        let timing = self.settings.timing;
        let enabled = self.registry.enabled_ids();
        if enabled.is_empty() {
            warn!("no services enabled, nothing to run");
            self.signal.request(Signal::Quit);
            return CycleOutcome::NoServices;
        }

        let actions = Arc::new(self.actions(mode));
        match CommandListener::new(self.signal.clone(), actions, timing.key_poll).spawn(&self.keys) {
            Ok(handle) => tasks.listener = Some(handle),
            Err(e) => warn!("could not start the key listener: {}", e),
        }

        for (i, id) in enabled.iter().enumerate() {
            if i > 0 && !self.pause(timing.stagger).await {
                self.signal.request(Signal::Quit);
                return CycleOutcome::Interrupted;
            }
            if !self.signal.is_continue() {
                break;
            }
            match self.registry.start(id) {
                Ok(_) => report.started.push(id.clone()),
                Err(e) => error!("{:#}", anyhow::Error::from(e)),
            }
        }
        summary::print_running_summary(&self.registry);
        tasks.ready = self.spawn_readiness(&report.started);

        let mut ticker = tokio::time::interval(timing.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.interrupt.notified() => {
                    warn!("interrupted, shutting down");
                    self.signal.request(Signal::Quit);
                    return CycleOutcome::Interrupted;
                }
            }

            for (id, status) in self.registry.poll_liveness() {
                let name = self.registry.spec(&id).map_or(id.as_str(), |s| s.name.as_str());
                warn!(service = %id, "{} exited ({})", name, status);
            }

            match self.signal.get() {
                Signal::Reboot(next) => return CycleOutcome::Reboot(next),
                Signal::Quit => return CycleOutcome::Quit,
                Signal::Continue => {}
            }

            // Losing this race means the listener just set a signal; the
            // next tick reads it.
            if self.registry.live_count() == 0 && self.signal.request(Signal::Quit) {
                warn!("all services have exited");
                return CycleOutcome::AllExited;
            }
        }
    }

    async fn drain(&self, tasks: CycleTasks, ports: &[u16]) {
        let grace = self.settings.timing.stop_grace;
        if self.signal.is_continue() {
            self.signal.request(Signal::Quit);
        }
        if let Some(ready) = tasks.ready {
            ready.abort();
        }

        self.registry.stop_all(grace).await;
        self.registry.stop_tool(grace).await;

        if let Some(listener) = tasks.listener {
            let joined = tokio::task::spawn_blocking(move || listener.join()).await;
            if !matches!(joined, Ok(Ok(_))) {
                warn!("key listener thread panicked");
            }
        }

        self.registry.output().drain(OUTPUT_DRAIN).await;
        self.reaper.reclaim_all(ports).await;
    }

    /// Sleep, unless Ctrl-C arrives first. `false` when interrupted.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.interrupt.notified() => false,
        }
    }

    fn disable_missing_optional(&self) {
        for spec in self.registry.specs() {
            if !spec.required && self.registry.is_enabled(&spec.id) && !spec.dir.is_dir() {
                warn!(
                    service = %spec.id,
                    "{} not found at {}, disabling it",
                    spec.name,
                    spec.dir.display()
                );
                self.registry.set_enabled(&spec.id, false);
            }
        }
    }

    /// Every service port plus the tool's.
    fn managed_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.registry.specs().map(|s| s.port).collect();
        if let Some(port) = self.settings.tool.as_ref().and_then(|t| t.port) {
            ports.push(port);
        }
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    fn header(&self) -> HeaderInfo {
        HeaderInfo {
            project: self.settings.project.clone(),
            log_path: self.settings.log_path.clone(),
            tool_name: self.settings.tool.as_ref().map(|t| t.name.clone()),
        }
    }

    /// Wait for the primary service and open it once it answers.
    fn spawn_readiness(&self, started: &[String]) -> Option<tokio::task::JoinHandle<()>> {
        let id = self.settings.primary.as_ref().filter(|id| started.contains(*id))?;
        let spec = self.registry.spec(id)?.clone();
        let probe = self.probe;
        let timing = self.settings.timing;
        let open = self.settings.open_browser;
        let opener = self.opener.clone();
        let signal = self.signal.clone();

        Some(tokio::spawn(async move {
            let url = spec.url();
            if !probe.wait_ready(spec.port, timing.ready_timeout).await {
                warn!(
                    service = %spec.id,
                    "{} not accepting connections on port {} after {}, not opening the browser",
                    spec.name,
                    spec.port,
                    humantime::format_duration(timing.ready_timeout)
                );
                return;
            }
            info!(service = %spec.id, "{} is ready at {}", spec.name, url);
            if !open {
                return;
            }
            tokio::time::sleep(timing.open_delay).await;
            if signal.is_continue() {
                if let Err(e) = (*opener)(&url) {
                    warn!("could not open {}: {:#}", url, e);
                }
            }
        }))
    }

    fn actions(&self, mode: RebootMode) -> SupervisorActions {
        SupervisorActions {
            registry: self.registry.clone(),
            runtime: Handle::current(),
            opener: self.opener.clone(),
            probe: self.probe,
            primary_url: self
                .settings
                .primary
                .as_deref()
                .and_then(|id| self.registry.spec(id))
                .map(|s| s.url()),
            tool: self.settings.tool.clone(),
            datastore: self.settings.datastore.clone(),
            datastore_dir: self.settings.datastore_dir.clone(),
            timing: self.settings.timing,
            header: self.header(),
            mode,
        }
    }
}

fn enter(report: &mut CycleReport, phase: Phase) {
    info!(cycle = report.number, mode = %report.mode, "entering {}", phase);
    report.phases.push(phase);
}

#[derive(Default)]
struct CycleTasks {
    listener: Option<std::thread::JoinHandle<Result<(), ListenerError>>>,
    ready: Option<tokio::task::JoinHandle<()>>,
}

/// Key commands that act without ending the cycle. Called on the listener
/// thread; async work goes through the runtime handle.
struct SupervisorActions {
    registry: Arc<ServiceRegistry>,
    runtime: Handle,
    opener: Opener,
    probe: ReadinessProbe,
    primary_url: Option<String>,
    tool: Option<ToolSpec>,
    datastore: DatastoreConfig,
    datastore_dir: PathBuf,
    timing: TimingConfig,
    header: HeaderInfo,
    mode: RebootMode,
}

impl SupervisorActions {
    fn open(&self, url: &str) {
        if let Err(e) = (*self.opener)(url) {
            warn!("could not open {}: {:#}", url, e);
        }
    }
}

impl CommandHandler for SupervisorActions {
    fn toggle(&self, n: usize) {
        match self.registry.toggle_index(n) {
            Some((id, enabled)) => {
                let name = self.registry.spec(&id).map_or(id.as_str(), |s| s.name.as_str());
                let state = if enabled { "enabled" } else { "disabled" };
                info!(service = %id, "{} {}, applies from the next reboot", name, state);
            }
            None => debug!("no service {}", n),
        }
    }

    fn open_browser(&self) {
        match &self.primary_url {
            Some(url) => self.open(url),
            None => warn!("no primary service to open"),
        }
    }

    fn open_tool(&self) {
        let Some(tool) = &self.tool else {
            info!("no tool configured");
            return;
        };
        let _runtime = self.runtime.enter();
        match self.registry.start_tool(tool) {
            Ok(ToolStart::Started(_)) => {
                let Some(port) = tool.port else {
                    return;
                };
                let url = format!("http://localhost:{}", port);
                let probe = self.probe;
                let timeout = self.timing.ready_timeout;
                let opener = self.opener.clone();
                let name = tool.name.clone();
                self.runtime.spawn(async move {
                    if !probe.wait_ready(port, timeout).await {
                        warn!("{} not accepting connections on port {}", name, port);
                        return;
                    }
                    if let Err(e) = (*opener)(&url) {
                        warn!("could not open {}: {:#}", url, e);
                    }
                });
            }
            Ok(ToolStart::AlreadyRunning(info)) => {
                info!(pid = ?info.pid, "{} already running", tool.name);
                if let Some(url) = tool.url() {
                    self.open(&url);
                }
            }
            Err(e) => error!("{:#}", anyhow::Error::from(e)),
        }
    }

    fn health_check(&self) {
        let status = self.runtime.block_on(datastore::check(
            &self.datastore,
            &self.datastore_dir,
            self.timing.datastore_timeout,
        ));
        datastore::report(&status, &self.datastore);
    }

    fn clear_screen(&self) {
        summary::clear_screen();
        summary::print_header(&self.header, &self.registry, self.mode);
        summary::print_running_summary(&self.registry);
    }
}
