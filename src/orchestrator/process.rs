use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::platform::{self, ProcessGroupHandle};
use crate::ui::logs::{detect_log_level, LogLine};

/// Where child stdout/stderr lines go. Cloned into every handle; the pump
/// tasks are tracked so shutdown can wait for the last lines.
#[derive(Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<LogLine>,
    tracker: TaskTracker,
}

impl OutputSink {
    pub fn new(tx: mpsc::Sender<LogLine>) -> Self {
        Self {
            tx,
            tracker: TaskTracker::new(),
        }
    }

    /// Wait for every pump whose pipes have closed, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        self.tracker.close();
        let _ = tokio::time::timeout(timeout, self.tracker.wait()).await;
        self.tracker.reopen();
    }

    fn pump<R>(&self, label: &str, reader: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.tx.clone();
        let label = label.to_string();
        self.tracker.spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(text)) => {
                        let level = detect_log_level(&text);
                        // A closed receiver only means nobody is watching.
                        let _ = tx
                            .send(LogLine {
                                timestamp: chrono::Utc::now(),
                                service: label.clone(),
                                text,
                                is_stderr,
                                level,
                            })
                            .await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(service = %label, error = %e, "output read error");
                        break;
                    }
                }
            }
        });
    }
}

/// Identity of a live process as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleInfo {
    pub pid: Option<u32>,
    pub started_at: DateTime<Local>,
}

/// A spawned service or tool process, in its own process group, with its
/// output pumped into an [`OutputSink`].
pub struct ServiceHandle {
    child: tokio::process::Child,
    pid: Option<u32>,
    group: Option<ProcessGroupHandle>,
    started_at: DateTime<Local>,
}

impl ServiceHandle {
    pub fn spawn(
        label: &str,
        command: &str,
        dir: &Path,
        env: &BTreeMap<String, String>,
        output: &OutputSink,
    ) -> io::Result<Self> {
        let mut cmd = platform::shell_command(command);
        cmd.current_dir(dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let group = platform::post_spawn_setup(pid);
        debug!(service = %label, pid = ?pid, "spawned via {}: {}", platform::shell_name(), command);

        if let Some(stdout) = child.stdout.take() {
            output.pump(label, stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            output.pump(label, stderr, true);
        }

        Ok(Self {
            child,
            pid,
            group,
            started_at: Local::now(),
        })
    }

    pub fn info(&self) -> HandleInfo {
        HandleInfo {
            pid: self.pid,
            started_at: self.started_at,
        }
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Signal the rest of the process group after the leader has exited.
    pub fn end_orphans(&self) {
        platform::end_orphans(self.pid, self.group.as_ref());
    }

    /// Graceful stop of the whole process group, forced after `grace`. The
    /// group is signalled even when the leader already exited, since its
    /// children may still hold the port.
    pub async fn terminate(mut self, grace: Duration) {
        platform::terminate_child(&mut self.child, self.pid, self.group.as_ref(), grace).await;
    }
}
