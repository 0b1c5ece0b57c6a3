#![allow(dead_code)]
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct TestProject {
    pub dir: TempDir,
    pub config_path: PathBuf,
}

impl TestProject {
    pub fn new(config_toml: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("devcycle.toml");
        std::fs::write(&config_path, config_toml).unwrap();
        Self { dir, config_path }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("devcycle.log")
    }

    pub fn log(&self) -> String {
        std::fs::read_to_string(self.log_path()).unwrap_or_default()
    }
}

/// Timings small enough for tests; appended to every generated config.
pub const FAST_TIMING: &str = r#"
[timing]
monitor_interval = "100ms"
key_poll = "50ms"
ready_poll = "100ms"
stagger = "100ms"
port_release = "200ms"
stop_grace = "2s"
reboot_pause = "100ms"
"#;

/// A config with one HTTP service per port, in fast mode friendly form.
pub fn http_services_config(name: &str, ports: &[u16]) -> String {
    let mut toml = format!(
        "[project]\nname = \"{}\"\nopen_browser = false\n\n[datastore]\ncheck = false\n",
        name
    );
    for (i, port) in ports.iter().enumerate() {
        toml.push_str(&format!(
            "\n[services.svc{i}]\ncommand = \"python3 -m http.server {port} --bind 127.0.0.1\"\nport = {port}\n"
        ));
    }
    toml.push_str(FAST_TIMING);
    toml
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn free_ports(count: usize) -> Vec<u16> {
    // Bind all at once to avoid reuse, then drop
    let listeners: Vec<_> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

pub fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

pub fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// The binary under test with piped stdin, so keys can be typed into it.
pub fn spawn_devcycle(project: &TestProject, extra: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_devcycle"))
        .args(["-f", project.config_path.to_str().unwrap()])
        .args(extra)
        .env("RUST_LOG", "info")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start devcycle")
}

pub fn press(child: &mut Child, key: &str) {
    let stdin = child.stdin.as_mut().expect("stdin is piped");
    stdin.write_all(key.as_bytes()).unwrap();
    stdin.flush().unwrap();
}

pub fn wait_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let _ = child.kill();
    None
}

/// Poll the run log until it contains `needle`.
pub fn wait_for_log(project: &TestProject, needle: &str, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if project.log().contains(needle) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}
