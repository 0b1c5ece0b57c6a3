use std::io;
use std::os::fd::AsRawFd;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use nix::unistd::Pid;

use super::discovery;

/// No-op handle on Unix — process group cleanup uses killpg with the child PID.
pub struct ProcessGroupHandle;

/// Return the user's default shell from `$SHELL`, falling back to `sh`.
fn user_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string())
}

/// Human-readable description of the shell for log messages.
pub fn shell_name() -> String {
    format!("{} -lc", user_shell())
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new(user_shell());
    // Login shell (-l) so version managers such as nvm put node on PATH.
    cmd.arg("-l").arg("-c").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub fn post_spawn_setup(_child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    None
}

pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    _group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) {
    let Some(pid) = child_pid else {
        let _ = child.kill().await;
        return;
    };
    let pgid = Pid::from_raw(pid as i32);
    match killpg(pgid, Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM to process group"),
        Err(Errno::ESRCH) => {
            debug!(pid, "process group already exited");
            let _ = child.wait().await;
            return;
        }
        Err(e) => {
            warn!(pid, error = %e, "killpg(SIGTERM) failed, falling back to kill");
            let _ = child.kill().await;
            return;
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_status)) => debug!(pid, "child exited after SIGTERM"),
        _ => {
            warn!(pid, grace = ?grace, "child did not exit in time, sending SIGKILL");
            let _ = killpg(pgid, Signal::SIGKILL);
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

pub fn end_orphans(leader_pid: Option<u32>, _group_handle: Option<&ProcessGroupHandle>) {
    let Some(pid) = leader_pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => debug!(pid, "sent SIGTERM to leftover process group"),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "killpg(SIGTERM) on leftover group failed"),
    }
}

pub fn kill_process(pid: u32) -> io::Result<()> {
    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::from(e)),
    }
}

#[cfg(target_os = "linux")]
pub fn listening_pids(port: u16) -> io::Result<Vec<u32>> {
    match proc_listening_pids(port) {
        Ok(Some(pids)) => Ok(pids),
        // Sockets exist but belong to processes we cannot inspect.
        Ok(None) => lsof_listening_pids(port),
        Err(e) => {
            debug!(port, error = %e, "/proc discovery failed, trying lsof");
            lsof_listening_pids(port)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn listening_pids(port: u16) -> io::Result<Vec<u32>> {
    lsof_listening_pids(port)
}

/// `Ok(None)` when listening sockets were found but no owning pid could be
/// resolved.
#[cfg(target_os = "linux")]
fn proc_listening_pids(port: u16) -> io::Result<Option<Vec<u32>>> {
    let mut inodes = discovery::listening_inodes(&std::fs::read_to_string("/proc/net/tcp")?, port);
    if let Ok(tcp6) = std::fs::read_to_string("/proc/net/tcp6") {
        inodes.extend(discovery::listening_inodes(&tcp6, port));
    }
    if inodes.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|link| discovery::socket_inode(&link.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        });
        if owns_socket {
            pids.push(pid);
        }
    }

    if pids.is_empty() {
        Ok(None)
    } else {
        Ok(Some(pids))
    }
}

fn lsof_listening_pids(port: u16) -> io::Result<Vec<u32>> {
    let output = std::process::Command::new("lsof")
        .arg("-nP")
        .arg("-t")
        .arg(format!("-iTCP:{}", port))
        .arg("-sTCP:LISTEN")
        .output()?;
    // lsof exits 1 when nothing matches.
    if !output.status.success() && !output.stdout.is_empty() {
        return Err(io::Error::other(format!(
            "lsof failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(discovery::lsof_pids(&String::from_utf8_lossy(&output.stdout)))
}

#[cfg(target_os = "linux")]
pub fn process_command(pid: u32) -> Option<String> {
    let cmdline = std::fs::read_to_string(format!("/proc/{}/cmdline", pid)).ok()?;
    let cmd = cmdline.replace('\0', " ").trim().to_string();
    (!cmd.is_empty()).then_some(cmd)
}

#[cfg(not(target_os = "linux"))]
pub fn process_command(pid: u32) -> Option<String> {
    let output = std::process::Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "command="])
        .output()
        .ok()?;
    let cmd = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!cmd.is_empty()).then_some(cmd)
}

pub fn opener_command(url: &str) -> std::process::Command {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let mut cmd = std::process::Command::new(program);
    cmd.arg(url);
    cmd
}

/// Single-key input from stdin.
///
/// When stdin is a terminal it is switched to non-canonical, no-echo mode so
/// keys arrive without Enter. Output processing is left alone so service
/// logs keep their line breaks. The original mode is restored on drop.
pub struct TerminalKeys {
    saved: Option<Termios>,
}

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        let stdin = io::stdin();
        let saved = match termios::tcgetattr(&stdin) {
            Ok(original) => {
                let mut cbreak = original.clone();
                cbreak
                    .local_flags
                    .remove(LocalFlags::ICANON | LocalFlags::ECHO);
                termios::tcsetattr(&stdin, SetArg::TCSANOW, &cbreak)?;
                Some(original)
            }
            // Not a terminal: read piped input as-is.
            Err(Errno::ENOTTY) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { saved })
    }

    /// Wait up to `timeout` for one key. `Ok(None)` when nothing arrived.
    pub fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>> {
        let stdin = io::stdin();
        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let ready = {
            let mut fds = [PollFd::new(
                std::os::fd::AsFd::as_fd(&stdin),
                PollFlags::POLLIN,
            )];
            match poll(&mut fds, millis) {
                Ok(0) | Err(Errno::EINTR) => false,
                Ok(_) => fds[0].revents().is_some_and(|r| {
                    r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
                }),
                Err(e) => return Err(e.into()),
            }
        };
        if !ready {
            return Ok(None);
        }

        let mut buf = [0u8; 1];
        match nix::unistd::read(stdin.as_raw_fd(), &mut buf) {
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed")),
            Ok(_) => Ok(Some(buf[0] as char)),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if let Some(original) = &self.saved {
            let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, original);
        }
    }
}
