use std::ffi::c_void;
use std::io;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, TerminateJobObject,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, CREATE_NEW_PROCESS_GROUP, PROCESS_SET_QUOTA, PROCESS_TERMINATE,
};

use super::discovery;

/// Holds a Windows Job Object handle for process group management.
pub struct ProcessGroupHandle {
    job: *mut c_void,
}

impl Drop for ProcessGroupHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.job);
        }
    }
}

// SAFETY: Job object handles are thread-safe Windows kernel objects.
unsafe impl Send for ProcessGroupHandle {}
unsafe impl Sync for ProcessGroupHandle {}

pub fn shell_name() -> String {
    "cmd.exe /C".to_string()
}

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    let pid = child_pid?;
    unsafe {
        let job = CreateJobObjectW(std::ptr::null(), std::ptr::null());
        if job.is_null() {
            warn!("CreateJobObjectW failed");
            return None;
        }

        let proc_handle = OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid);
        if proc_handle.is_null() {
            warn!(pid, "OpenProcess failed for job assignment");
            CloseHandle(job);
            return None;
        }

        let result = AssignProcessToJobObject(job, proc_handle);
        CloseHandle(proc_handle);

        if result == 0 {
            warn!(pid, "AssignProcessToJobObject failed");
            CloseHandle(job);
            return None;
        }

        Some(ProcessGroupHandle { job })
    }
}

pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) {
    if let Some(pid) = child_pid {
        unsafe {
            if GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) != 0 {
                debug!(pid, "sent CTRL_BREAK_EVENT");
            }
        }
        if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
            debug!(pid, "child exited after CTRL_BREAK");
            return;
        }
        warn!(pid, grace = ?grace, "child did not exit in time, terminating");
    }

    if let Some(handle) = group_handle {
        unsafe {
            TerminateJobObject(handle.job, 1);
        }
    } else {
        let _ = child.kill().await;
    }
    let _ = child.wait().await;
}

pub fn end_orphans(_leader_pid: Option<u32>, group_handle: Option<&ProcessGroupHandle>) {
    if let Some(handle) = group_handle {
        unsafe {
            TerminateJobObject(handle.job, 1);
        }
    }
}

pub fn kill_process(pid: u32) -> io::Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()?;
    // 128: process not found.
    if output.status.success() || output.status.code() == Some(128) {
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "taskkill failed for PID {}: {}",
            pid,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

pub fn listening_pids(port: u16) -> io::Result<Vec<u32>> {
    let output = std::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other("netstat failed"));
    }
    let mut pids = discovery::netstat_pids(&String::from_utf8_lossy(&output.stdout), port);
    let v6 = std::process::Command::new("netstat")
        .args(["-ano", "-p", "TCPv6"])
        .output()?;
    pids.extend(discovery::netstat_pids(&String::from_utf8_lossy(&v6.stdout), port));
    pids.sort_unstable();
    pids.dedup();
    Ok(pids)
}

pub fn process_command(pid: u32) -> Option<String> {
    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/FO", "CSV", "/NH"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let image = text.lines().next()?.split(',').next()?.trim_matches('"');
    (!image.is_empty() && !image.starts_with("INFO:")).then(|| image.to_string())
}

pub fn opener_command(url: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new("cmd");
    cmd.args(["/C", "start", "", url]);
    cmd
}

/// Single-key input from the console in raw mode. Ctrl-C arrives as a key
/// event in raw mode and is passed on as ETX.
pub struct TerminalKeys {
    raw: bool,
}

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        let raw = crossterm::terminal::enable_raw_mode().is_ok();
        Ok(Self { raw })
    }

    pub fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    Ok(Some('\u{3}'))
                }
                KeyCode::Char(c) => Ok(Some(c)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if self.raw {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}
