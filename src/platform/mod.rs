use std::io;
use std::time::Duration;
use tokio::process::Command;

mod discovery;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::{ProcessGroupHandle, TerminalKeys};

/// Create a platform-appropriate shell command.
/// Unix: `$SHELL -l -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Configure the command to run in a new process group.
/// Unix: `process_group(0)`, Windows: `CREATE_NEW_PROCESS_GROUP`
pub fn configure_process_group(cmd: &mut Command) {
    imp::configure_process_group(cmd)
}

/// Perform any post-spawn setup (e.g., Job Object on Windows).
/// Returns a handle that must be kept alive for the process lifetime.
pub fn post_spawn_setup(child_pid: Option<u32>) -> Option<ProcessGroupHandle> {
    imp::post_spawn_setup(child_pid)
}

/// Terminate a child process and its descendants: a graceful request to the
/// whole group first, then a forced kill once `grace` has elapsed.
pub async fn terminate_child(
    child: &mut tokio::process::Child,
    child_pid: Option<u32>,
    group_handle: Option<&ProcessGroupHandle>,
    grace: Duration,
) {
    imp::terminate_child(child, child_pid, group_handle, grace).await
}

/// Stop what is left of a process group whose leader has already exited.
/// Unix: `killpg(SIGTERM)`, Windows: terminate the Job Object.
pub fn end_orphans(leader_pid: Option<u32>, group_handle: Option<&ProcessGroupHandle>) {
    imp::end_orphans(leader_pid, group_handle)
}

/// Pids of the processes listening on TCP `port`.
pub fn listening_pids(port: u16) -> io::Result<Vec<u32>> {
    imp::listening_pids(port)
}

/// Forcefully kill a single process. A process that is already gone is not
/// an error.
pub fn kill_process(pid: u32) -> io::Result<()> {
    imp::kill_process(pid)
}

/// Best-effort command line of a process, for log messages.
pub fn process_command(pid: u32) -> Option<String> {
    imp::process_command(pid)
}

/// The platform's "open this URL with the default handler" command.
pub fn opener_command(url: &str) -> std::process::Command {
    imp::opener_command(url)
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    let Some(home) = dirs::home_dir() else {
        return path.to_string();
    };
    let home = home.to_string_lossy();
    if path == "~" || path == "$HOME" {
        return home.to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("{}/{}", home, rest);
    }
    if let Some(rest) = path
        .strip_prefix("$HOME/")
        .or_else(|| path.strip_prefix("$HOME\\"))
    {
        return format!("{}/{}", home, rest);
    }
    path.to_string()
}

/// Shell name for log messages.
pub fn shell_name() -> String {
    imp::shell_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> String {
        dirs::home_dir().unwrap().to_string_lossy().to_string()
    }

    #[test]
    fn expand_home_prefixes() {
        assert_eq!(expand_home("~"), home());
        assert_eq!(expand_home("$HOME"), home());
        assert_eq!(expand_home("~/code/web"), format!("{}/code/web", home()));
        assert_eq!(expand_home("$HOME/code"), format!("{}/code", home()));
    }

    #[test]
    fn expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/usr/bin/cmd"), "/usr/bin/cmd");
        assert_eq!(expand_home("../auth"), "../auth");
        assert_eq!(expand_home("/some/~path"), "/some/~path");
        assert_eq!(expand_home(""), "");
    }

    #[test]
    fn listening_pids_of_unused_port_is_empty() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        // Discovery tools may be missing in minimal environments.
        if let Ok(pids) = listening_pids(port) {
            assert!(pids.is_empty(), "{pids:?}");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn listening_pids_finds_own_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let pids = listening_pids(port).unwrap();
        assert!(pids.contains(&std::process::id()), "{pids:?}");
    }
}

#[cfg(test)]
pub mod test_commands {
    #[cfg(unix)]
    pub fn echo_two_lines() -> &'static str {
        "echo hello && echo world"
    }
    #[cfg(windows)]
    pub fn echo_two_lines() -> &'static str {
        "echo hello&& echo world"
    }

    #[cfg(unix)]
    pub fn sleep_long() -> &'static str {
        "sleep 60"
    }
    #[cfg(windows)]
    pub fn sleep_long() -> &'static str {
        "ping -n 61 127.0.0.1 > nul"
    }

    /// Ignores the graceful stop request so only the forced kill ends it.
    #[cfg(unix)]
    pub fn stubborn_sleep() -> &'static str {
        "trap '' TERM; sleep 60"
    }

    #[cfg(unix)]
    pub fn exit_failure() -> &'static str {
        "exit 3"
    }
    #[cfg(windows)]
    pub fn exit_failure() -> &'static str {
        "exit /b 3"
    }
}
