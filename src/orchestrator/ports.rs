use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// A process found listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOwner {
    pub pid: u32,
    pub command: Option<String>,
}

impl std::fmt::Display for PortOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.command {
            Some(cmd) if cmd.chars().count() > 60 => {
                let short: String = cmd.chars().take(57).collect();
                write!(f, "{}... (PID {})", short, self.pid)
            }
            Some(cmd) => write!(f, "{} (PID {})", cmd, self.pid),
            None => write!(f, "PID {}", self.pid),
        }
    }
}

/// How listeners are found and killed. The reaper is written against this
/// so tests can substitute a fake for the operating system.
pub trait ProcessDiscovery: Send + Sync {
    fn port_owners(&self, port: u16) -> io::Result<Vec<PortOwner>>;
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// The host's processes, through `/proc`, `lsof` or `netstat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiscovery;

impl ProcessDiscovery for SystemDiscovery {
    fn port_owners(&self, port: u16) -> io::Result<Vec<PortOwner>> {
        Ok(crate::platform::listening_pids(port)?
            .into_iter()
            .map(|pid| PortOwner {
                pid,
                command: crate::platform::process_command(pid),
            })
            .collect())
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        crate::platform::kill_process(pid)
    }
}

/// A port that could not be reclaimed. Never fatal: the service that wants
/// the port will fail to bind and report it.
#[derive(Debug, Error)]
pub enum ReclaimWarning {
    #[error("port {port} is still in use after killing {pids:?}")]
    StillBusy { port: u16, pids: Vec<u32> },
    #[error("could not look up the owner of port {port}")]
    Discovery {
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a successful reclaim. `pids` is empty when the port was
/// already free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freed {
    pub port: u16,
    pub pids: Vec<u32>,
}

/// True when nothing listens on `port`, on loopback or on any interface,
/// over IPv4 or IPv6. Dev servers often bind `localhost` as `::1` only.
pub fn check_port_available(port: u16) -> bool {
    let v4_free = [Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED]
        .into_iter()
        .all(|ip| TcpListener::bind(SocketAddr::from((ip, port))).is_ok());
    // Hosts without IPv6 fail these binds with something other than AddrInUse.
    let v6_free = [Ipv6Addr::LOCALHOST, Ipv6Addr::UNSPECIFIED]
        .into_iter()
        .all(|ip| match TcpListener::bind(SocketAddr::from((ip, port))) {
            Ok(_) => true,
            Err(e) => e.kind() != io::ErrorKind::AddrInUse,
        });
    v4_free && v6_free
}

/// Frees ports by killing whatever listens on them.
pub struct PortReaper<D> {
    discovery: D,
    release_wait: Duration,
    own_pid: u32,
}

impl<D: ProcessDiscovery> PortReaper<D> {
    pub fn new(discovery: D, release_wait: Duration) -> Self {
        Self {
            discovery,
            release_wait,
            own_pid: std::process::id(),
        }
    }

    /// Make `port` free. Calling it again on a freed port is a no-op.
    pub async fn reclaim(&self, port: u16) -> Result<Freed, ReclaimWarning> {
        if check_port_available(port) {
            debug!(port, "port already free");
            return Ok(Freed {
                port,
                pids: Vec::new(),
            });
        }

        let owners = self
            .discovery
            .port_owners(port)
            .map_err(|source| ReclaimWarning::Discovery { port, source })?;

        let mut killed = Vec::new();
        for owner in owners {
            if owner.pid == self.own_pid {
                debug!(port, "port held by this process, not killing");
                continue;
            }
            match self.discovery.kill(owner.pid) {
                Ok(()) => {
                    info!(port, "killed {}", owner);
                    killed.push(owner.pid);
                }
                Err(e) => warn!(port, pid = owner.pid, error = %e, "failed to kill port owner"),
            }
        }

        tokio::time::sleep(self.release_wait).await;

        if check_port_available(port) {
            Ok(Freed { port, pids: killed })
        } else {
            Err(ReclaimWarning::StillBusy { port, pids: killed })
        }
    }

    /// Reclaim every port, logging the ones that stay busy.
    pub async fn reclaim_all(&self, ports: &[u16]) -> Vec<Freed> {
        let mut freed = Vec::with_capacity(ports.len());
        for &port in ports {
            match self.reclaim(port).await {
                Ok(f) => freed.push(f),
                Err(warning) => warn!("{:#}", anyhow::Error::from(warning)),
            }
        }
        freed
    }
}
