use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct DevcycleConfig {
    pub project: ProjectConfig,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub tool: Option<ToolConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Environment shared by every service and setup step.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_log_file() -> String {
    "devcycle.log".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Service whose readiness triggers the browser open. Defaults to the
    /// first service by identifier.
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_true")]
    pub open_browser: bool,
    /// Browser command tried before the platform opener.
    #[serde(default)]
    pub browser: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Display name; the table key is used when absent.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    pub command: String,
    pub port: u16,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// A missing working directory fails setup for required services and
    /// disables optional ones at startup.
    #[serde(default = "default_true")]
    pub required: bool,
}

/// Per-service setup steps. Every command runs inside the service's
/// working directory with the service environment applied.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SetupConfig {
    /// Commands that must succeed before the first cycle, e.g. `node -v`.
    #[serde(default)]
    pub toolchain: Vec<String>,
    /// Directories removed before a full setup.
    #[serde(default)]
    pub caches: Vec<String>,
    /// Directories removed before a fast setup. Build caches are normally
    /// left out of this list so they survive fast reboots.
    #[serde(default)]
    pub fast_caches: Vec<String>,
    /// Path whose presence means dependencies are already provisioned.
    #[serde(default)]
    pub deps_marker: Option<String>,
    /// Provisioning attempts, tried in order until one succeeds.
    #[serde(default)]
    pub install: StringOrList,
    #[serde(default)]
    pub generate: Option<String>,
    /// Schema file gating the generate and sync steps.
    #[serde(default)]
    pub schema: Option<String>,
    /// Schema sync attempts, tried in order. The last entry is expected to
    /// be the non-destructive push.
    #[serde(default)]
    pub sync: StringOrList,
}

/// A value that can be either a single string or a list of strings.
/// When given a string, it is kept as a single-element list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringOrList(pub Vec<String>);

impl StringOrList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringOrListVisitor;

        impl<'de> de::Visitor<'de> for StringOrListVisitor {
            type Value = StringOrList;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<StringOrList, E> {
                Ok(StringOrList(vec![value.to_string()]))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<StringOrList, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringOrList(values))
            }
        }

        deserializer.deserialize_any(StringOrListVisitor)
    }
}

fn default_datastore_env_file() -> String {
    ".env.local".to_string()
}

fn default_datastore_key() -> String {
    "DATABASE_URL".to_string()
}

fn default_datastore_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatastoreConfig {
    /// Run the reachability check before each full cycle.
    #[serde(default = "default_true")]
    pub check: bool,
    /// Connection URL. When absent, `key` is looked up in `env_file`
    /// inside the primary service's directory.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_datastore_env_file")]
    pub env_file: String,
    #[serde(default = "default_datastore_key")]
    pub key: String,
    #[serde(default = "default_datastore_port")]
    pub default_port: u16,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            check: true,
            url: None,
            env_file: default_datastore_env_file(),
            key: default_datastore_key(),
            default_port: default_datastore_port(),
        }
    }
}

fn default_tool_name() -> String {
    "tool".to_string()
}

/// Long-lived helper (a database browser, for instance) started on demand.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolConfig {
    #[serde(default = "default_tool_name")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_KEY_POLL: Duration = Duration::from_millis(100);
pub const DEFAULT_READY_POLL: Duration = Duration::from_millis(500);
pub const DEFAULT_READY_CONNECT: Duration = Duration::from_secs(1);
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_PORT_RELEASE: Duration = Duration::from_millis(500);
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(2);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_DATASTORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SETUP_STEP_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_REBOOT_PAUSE: Duration = Duration::from_secs(1);

fn parse_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw)
        .map_err(|e| de::Error::custom(format!("invalid duration {raw:?}: {e}")))
}

fn default_monitor_interval() -> Duration {
    DEFAULT_MONITOR_INTERVAL
}

fn default_key_poll() -> Duration {
    DEFAULT_KEY_POLL
}

fn default_ready_poll() -> Duration {
    DEFAULT_READY_POLL
}

fn default_ready_connect() -> Duration {
    DEFAULT_READY_CONNECT
}

fn default_ready_timeout() -> Duration {
    DEFAULT_READY_TIMEOUT
}

fn default_open_delay() -> Duration {
    DEFAULT_OPEN_DELAY
}

fn default_port_release() -> Duration {
    DEFAULT_PORT_RELEASE
}

fn default_stagger() -> Duration {
    DEFAULT_STAGGER
}

fn default_stop_grace() -> Duration {
    DEFAULT_STOP_GRACE
}

fn default_datastore_timeout() -> Duration {
    DEFAULT_DATASTORE_TIMEOUT
}

fn default_setup_step_timeout() -> Duration {
    DEFAULT_SETUP_STEP_TIMEOUT
}

fn default_reboot_pause() -> Duration {
    DEFAULT_REBOOT_PAUSE
}

/// Every interval and timeout the supervisor uses. Values are humantime
/// strings such as `"500ms"` or `"2s"`.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct TimingConfig {
    /// Liveness/signal poll period of the monitoring loop.
    #[serde(default = "default_monitor_interval", deserialize_with = "parse_duration")]
    pub monitor_interval: Duration,
    #[serde(default = "default_key_poll", deserialize_with = "parse_duration")]
    pub key_poll: Duration,
    #[serde(default = "default_ready_poll", deserialize_with = "parse_duration")]
    pub ready_poll: Duration,
    /// Timeout of a single readiness connect attempt.
    #[serde(default = "default_ready_connect", deserialize_with = "parse_duration")]
    pub ready_connect: Duration,
    /// Overall wait for the primary service before giving up on auto-open.
    #[serde(default = "default_ready_timeout", deserialize_with = "parse_duration")]
    pub ready_timeout: Duration,
    #[serde(default = "default_open_delay", deserialize_with = "parse_duration")]
    pub open_delay: Duration,
    /// Pause after killing a port owner so the OS can release the socket.
    #[serde(default = "default_port_release", deserialize_with = "parse_duration")]
    pub port_release: Duration,
    /// Delay between consecutive service launches.
    #[serde(default = "default_stagger", deserialize_with = "parse_duration")]
    pub stagger: Duration,
    #[serde(default = "default_stop_grace", deserialize_with = "parse_duration")]
    pub stop_grace: Duration,
    #[serde(default = "default_datastore_timeout", deserialize_with = "parse_duration")]
    pub datastore_timeout: Duration,
    #[serde(default = "default_setup_step_timeout", deserialize_with = "parse_duration")]
    pub setup_step_timeout: Duration,
    #[serde(default = "default_reboot_pause", deserialize_with = "parse_duration")]
    pub reboot_pause: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            key_poll: DEFAULT_KEY_POLL,
            ready_poll: DEFAULT_READY_POLL,
            ready_connect: DEFAULT_READY_CONNECT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            open_delay: DEFAULT_OPEN_DELAY,
            port_release: DEFAULT_PORT_RELEASE,
            stagger: DEFAULT_STAGGER,
            stop_grace: DEFAULT_STOP_GRACE,
            datastore_timeout: DEFAULT_DATASTORE_TIMEOUT,
            setup_step_timeout: DEFAULT_SETUP_STEP_TIMEOUT,
            reboot_pause: DEFAULT_REBOOT_PAUSE,
        }
    }
}

impl DevcycleConfig {
    /// The primary service id: the configured one, else the first by id.
    pub fn primary_service(&self) -> Option<&str> {
        match &self.project.primary {
            Some(primary) => Some(primary.as_str()),
            None => self.services.keys().next().map(|k| k.as_str()),
        }
    }

    /// Service ids in launch order: primary first, then by identifier.
    pub fn launch_order(&self) -> Vec<String> {
        let primary = self.primary_service().map(|p| p.to_string());
        let mut order: Vec<String> = Vec::with_capacity(self.services.len());
        if let Some(p) = &primary {
            if self.services.contains_key(p) {
                order.push(p.clone());
            }
        }
        for id in self.services.keys() {
            if Some(id) != primary.as_ref() {
                order.push(id.clone());
            }
        }
        order
    }
}
