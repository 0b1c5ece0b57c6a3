use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::model::{DevcycleConfig, ServiceConfig, ToolConfig};
use crate::config::resolve::ConfigLocation;
use crate::orchestrator::process::{HandleInfo, OutputSink, ServiceHandle};

/// Immutable description of one supervised service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub dir: PathBuf,
    pub command: String,
    /// Shared env, then service env, then `PORT`.
    pub env: BTreeMap<String, String>,
    pub enabled: bool,
    pub required: bool,
}

impl ServiceSpec {
    pub fn from_config(
        id: &str,
        svc: &ServiceConfig,
        shared_env: &BTreeMap<String, String>,
        location: &ConfigLocation,
    ) -> Self {
        let mut env = shared_env.clone();
        env.extend(svc.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert("PORT".to_string(), svc.port.to_string());
        Self {
            id: id.to_string(),
            name: svc.name.clone().unwrap_or_else(|| id.to_string()),
            port: svc.port,
            dir: location.resolve(svc.path.as_deref().unwrap_or(".")),
            command: svc.command.clone(),
            env,
            enabled: svc.enabled,
            required: svc.required,
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// The auxiliary tool, resolved like a service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub command: String,
    pub dir: PathBuf,
    pub port: Option<u16>,
    pub env: BTreeMap<String, String>,
}

impl ToolSpec {
    pub fn from_config(
        tool: &ToolConfig,
        shared_env: &BTreeMap<String, String>,
        location: &ConfigLocation,
    ) -> Self {
        Self {
            name: tool.name.clone(),
            command: tool.command.clone(),
            dir: location.resolve(tool.path.as_deref().unwrap_or(".")),
            port: tool.port,
            env: shared_env.clone(),
        }
    }

    pub fn url(&self) -> Option<String> {
        self.port.map(|p| format!("http://localhost:{}", p))
    }
}

/// Service specs in launch order.
pub fn specs_from_config(config: &DevcycleConfig, location: &ConfigLocation) -> Vec<ServiceSpec> {
    config
        .launch_order()
        .iter()
        .filter_map(|id| {
            let svc = config.services.get(id)?;
            Some(ServiceSpec::from_config(id, svc, &config.env, location))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Exited(Option<i32>),
    Terminating,
}

impl ServiceState {
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Terminating
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Exited(Some(code)) => write!(f, "exited ({})", code),
            ServiceState::Exited(None) => write!(f, "exited (signal)"),
            ServiceState::Terminating => write!(f, "terminating"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("working directory for '{id}' not found: {}", dir.display())]
    MissingDirectory { id: String, dir: PathBuf },
    #[error("failed to launch '{id}'")]
    Launch {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of asking for the auxiliary tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStart {
    Started(HandleInfo),
    AlreadyRunning(HandleInfo),
}

struct Slot {
    state: ServiceState,
    handle: Option<ServiceHandle>,
}

struct ServiceEntry {
    spec: ServiceSpec,
    enabled: AtomicBool,
    slot: Mutex<Slot>,
}

impl ServiceEntry {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Services in launch order with their enabled flags and live handles, plus
/// the auxiliary tool slot.
///
/// Shared by the monitoring loop and the command listener. Enabled flags are
/// atomics; each slot has its own mutex which is never held across an await.
/// A handle exists only while the state is `Starting`, `Running` or
/// `Terminating`.
pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
    tool: Mutex<Option<ServiceHandle>>,
    output: OutputSink,
}

impl ServiceRegistry {
    pub fn new(specs: Vec<ServiceSpec>, output: OutputSink) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| ServiceEntry {
                enabled: AtomicBool::new(spec.enabled),
                slot: Mutex::new(Slot {
                    state: ServiceState::Stopped,
                    handle: None,
                }),
                spec,
            })
            .collect();
        Self {
            entries,
            tool: Mutex::new(None),
            output,
        }
    }

    fn entry(&self, id: &str) -> Option<&ServiceEntry> {
        self.entries.iter().find(|e| e.spec.id == id)
    }

    pub fn specs(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    pub fn spec(&self, id: &str) -> Option<&ServiceSpec> {
        self.entry(id).map(|e| &e.spec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.entry(id)
            .is_some_and(|e| e.enabled.load(Ordering::Acquire))
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        if let Some(e) = self.entry(id) {
            e.enabled.store(enabled, Ordering::Release);
        }
    }

    /// Ids of enabled services, in launch order.
    pub fn enabled_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.enabled.load(Ordering::Acquire))
            .map(|e| e.spec.id.clone())
            .collect()
    }

    /// Flip a service's enabled flag and return the new value. A running
    /// handle is left alone; the change applies from the next cycle.
    pub fn toggle(&self, id: &str) -> Option<bool> {
        let entry = self.entry(id)?;
        let previous = entry.enabled.fetch_xor(true, Ordering::AcqRel);
        Some(!previous)
    }

    /// Toggle the `n`-th service (1-based, launch order).
    pub fn toggle_index(&self, n: usize) -> Option<(String, bool)> {
        let entry = self.entries.get(n.checked_sub(1)?)?;
        let enabled = self.toggle(&entry.spec.id)?;
        Some((entry.spec.id.clone(), enabled))
    }

    pub fn state(&self, id: &str) -> Option<ServiceState> {
        self.entry(id).map(|e| e.slot().state)
    }

    pub fn handle_info(&self, id: &str) -> Option<HandleInfo> {
        self.entry(id)?.slot().handle.as_ref().map(|h| h.info())
    }

    /// Launch a service. Starting a service that already has a live handle
    /// returns that handle's info and spawns nothing.
    pub fn start(&self, id: &str) -> Result<HandleInfo, StartError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| StartError::UnknownService(id.to_string()))?;
        let spec = &entry.spec;

        let mut slot = entry.slot();
        if let Some(handle) = &slot.handle {
            debug!(service = %id, "already running");
            return Ok(handle.info());
        }
        if !spec.dir.is_dir() {
            return Err(StartError::MissingDirectory {
                id: id.to_string(),
                dir: spec.dir.clone(),
            });
        }

        let handle = ServiceHandle::spawn(&spec.name, &spec.command, &spec.dir, &spec.env, &self.output)
            .map_err(|source| StartError::Launch {
                id: id.to_string(),
                source,
            })?;
        let info = handle.info();
        slot.handle = Some(handle);
        slot.state = ServiceState::Starting;
        info!(service = %id, pid = ?info.pid, port = spec.port, "started {}", spec.name);
        Ok(info)
    }

    /// Check every live handle once. Exited processes are detached and
    /// returned; survivors move from `Starting` to `Running`.
    pub fn poll_liveness(&self) -> Vec<(String, ExitStatus)> {
        let mut exited = Vec::new();
        for entry in &self.entries {
            let mut slot = entry.slot();
            let Some(handle) = slot.handle.as_mut() else {
                continue;
            };
            match handle.try_wait() {
                Ok(Some(status)) => {
                    handle.end_orphans();
                    slot.handle = None;
                    slot.state = ServiceState::Exited(status.code());
                    exited.push((entry.spec.id.clone(), status));
                }
                Ok(None) => {
                    if slot.state == ServiceState::Starting {
                        slot.state = ServiceState::Running;
                    }
                }
                Err(e) => warn!(service = %entry.spec.id, error = %e, "liveness check failed"),
            }
        }
        exited
    }

    /// Number of services with a live handle.
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.slot().handle.is_some())
            .count()
    }

    /// Stop one service. The handle is detached whatever happens.
    pub async fn stop(&self, id: &str, grace: Duration) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        let handle = {
            let mut slot = entry.slot();
            let handle = slot.handle.take();
            if handle.is_some() {
                slot.state = ServiceState::Terminating;
            }
            handle
        };
        if let Some(handle) = handle {
            info!(service = %id, "stopping");
            handle.terminate(grace).await;
            entry.slot().state = ServiceState::Stopped;
        }
    }

    /// Stop every live service concurrently.
    pub async fn stop_all(&self, grace: Duration) {
        let mut stopping = JoinSet::new();
        let mut ids = Vec::new();
        for entry in &self.entries {
            let mut slot = entry.slot();
            if let Some(handle) = slot.handle.take() {
                slot.state = ServiceState::Terminating;
                ids.push(entry.spec.id.clone());
                stopping.spawn(handle.terminate(grace));
            }
        }
        if !ids.is_empty() {
            info!("stopping {}", ids.join(", "));
        }
        while stopping.join_next().await.is_some() {}
        for id in ids {
            if let Some(entry) = self.entry(&id) {
                entry.slot().state = ServiceState::Stopped;
            }
        }
    }

    /// Start the tool, or report the instance that is already running.
    pub fn start_tool(&self, spec: &ToolSpec) -> Result<ToolStart, StartError> {
        let mut slot = self.tool.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.as_mut() {
            match handle.try_wait() {
                Ok(None) => return Ok(ToolStart::AlreadyRunning(handle.info())),
                _ => {
                    debug!(tool = %spec.name, "previous instance exited");
                    *slot = None;
                }
            }
        }
        if !spec.dir.is_dir() {
            return Err(StartError::MissingDirectory {
                id: spec.name.clone(),
                dir: spec.dir.clone(),
            });
        }
        let handle = ServiceHandle::spawn(&spec.name, &spec.command, &spec.dir, &spec.env, &self.output)
            .map_err(|source| StartError::Launch {
                id: spec.name.clone(),
                source,
            })?;
        let info = handle.info();
        *slot = Some(handle);
        info!(pid = ?info.pid, "started {}", spec.name);
        Ok(ToolStart::Started(info))
    }

    pub fn tool_running(&self) -> bool {
        let mut slot = self.tool.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_mut()
            .is_some_and(|h| matches!(h.try_wait(), Ok(None)))
    }

    pub async fn stop_tool(&self, grace: Duration) {
        let handle = self.tool.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            info!("stopping tool");
            handle.terminate(grace).await;
        }
    }
}
