use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::model::SetupConfig;
use crate::orchestrator::registry::ServiceSpec;
use crate::orchestrator::signal::RebootMode;
use crate::platform;

/// Failures that abort the run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("required tool check `{command}` failed: {detail}")]
    ToolchainMissing { command: String, detail: String },
    #[error("directory for '{id}' not found: {}", dir.display())]
    MissingDirectory { id: String, dir: PathBuf },
    #[error("installing dependencies for '{id}' failed after {attempts} attempt(s)")]
    ProvisionFailed { id: String, attempts: usize },
    #[error("generating client for '{id}' failed: {detail}")]
    GenerateFailed { id: String, detail: String },
}

/// Schema sync failure. Logged; the service starts anyway.
#[derive(Debug, Error)]
#[error("schema sync for '{id}' failed after {attempts} attempt(s)")]
pub struct SyncError {
    pub id: String,
    pub attempts: usize,
}

/// A tool found by the toolchain check, e.g. `node -v` → `v20.11.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolVersion {
    pub command: String,
    pub version: String,
}

/// Provisioning, build and migration steps run before services start.
pub trait SetupPipeline: Send + Sync {
    /// Run once, on the first cycle.
    fn check_toolchain(&self) -> impl Future<Output = Result<Vec<ToolVersion>, SetupError>> + Send;

    /// Remove the cache directories for `mode`. Returns how many were removed.
    fn clean_caches(&self, service: &ServiceSpec, mode: RebootMode) -> impl Future<Output = usize> + Send;

    /// `true` when dependencies are already installed.
    fn dependencies_present(&self, service: &ServiceSpec) -> bool;

    fn provision_dependencies(
        &self,
        service: &ServiceSpec,
    ) -> impl Future<Output = Result<(), SetupError>> + Send;

    /// `true` when the service has a schema; gates generate and sync.
    fn schema_present(&self, service: &ServiceSpec) -> bool;

    fn generate_client(&self, service: &ServiceSpec) -> impl Future<Output = Result<(), SetupError>> + Send;

    fn sync_schema(&self, service: &ServiceSpec) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// What setup did for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSetup {
    pub caches_removed: usize,
    pub provisioned: bool,
    pub generated: bool,
    /// `None` when there was no schema or the mode skips it.
    pub synced: Option<bool>,
}

/// Prepare one service for launch.
///
/// Fast mode only cleans `fast_caches`. Full mode cleans `caches`, installs
/// dependencies when they are missing, then generates the client and syncs
/// the schema if the service has one. A failed sync is logged and does not
/// stop the service from starting.
pub async fn prepare_service<P: SetupPipeline>(
    pipeline: &P,
    service: &ServiceSpec,
    mode: RebootMode,
) -> Result<ServiceSetup, SetupError> {
    if !service.dir.is_dir() {
        return Err(SetupError::MissingDirectory {
            id: service.id.clone(),
            dir: service.dir.clone(),
        });
    }

    info!(service = %service.id, %mode, "setting up {}", service.name);
    let mut outcome = ServiceSetup {
        caches_removed: pipeline.clean_caches(service, mode).await,
        ..Default::default()
    };
    if mode == RebootMode::Fast {
        info!(service = %service.id, "fast mode: build caches kept, provisioning skipped");
        return Ok(outcome);
    }

    if !pipeline.dependencies_present(service) {
        pipeline.provision_dependencies(service).await?;
        outcome.provisioned = true;
    }

    if pipeline.schema_present(service) {
        pipeline.generate_client(service).await?;
        outcome.generated = true;
        match pipeline.sync_schema(service).await {
            Ok(()) => outcome.synced = Some(true),
            Err(e) => {
                warn!("{}", e);
                outcome.synced = Some(false);
            }
        }
    }
    Ok(outcome)
}

/// Ordered fallback actions for one kind of failure: each is tried in turn
/// until one succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryPlan {
    actions: Vec<String>,
}

impl RecoveryPlan {
    pub fn new(actions: impl IntoIterator<Item = String>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Run `attempt` on each action until one returns `Ok`. On exhaustion
    /// returns the number of attempts made.
    pub async fn run<F, Fut, E>(&self, mut attempt: F) -> Result<usize, usize>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        for (i, action) in self.actions.iter().enumerate() {
            match attempt(action.clone()).await {
                Ok(()) => return Ok(i + 1),
                Err(e) => {
                    if i + 1 < self.actions.len() {
                        warn!("`{}` failed: {}; trying `{}`", action, e, self.actions[i + 1]);
                    } else {
                        warn!("`{}` failed: {}", action, e);
                    }
                }
            }
        }
        Err(self.actions.len())
    }
}

/// Why a single setup command failed.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("could not run: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("exited with {status}{}", last_line(.stderr))]
    Failed { status: String, stderr: String },
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| format!(": {}", l.trim()))
        .unwrap_or_default()
}

/// Run one shell command to completion with a timeout, logging its output
/// at debug level. Returns trimmed stdout.
pub async fn run_step(
    command: &str,
    dir: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<String, StepFailure> {
    debug!(dir = %dir.display(), "running `{}`", command);
    let mut cmd = platform::shell_command(command);
    cmd.current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| StepFailure::Timeout(timeout))??;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    for line in stdout.lines().chain(stderr.lines()) {
        debug!("  {}", line);
    }

    if output.status.success() {
        Ok(stdout.trim().to_string())
    } else {
        Err(StepFailure::Failed {
            status: output.status.to_string(),
            stderr,
        })
    }
}

/// [`SetupPipeline`] that runs the shell commands from `[setup]` inside each
/// service's directory.
pub struct CommandPipeline {
    setup: SetupConfig,
    toolchain_dir: PathBuf,
    step_timeout: Duration,
}

impl CommandPipeline {
    pub fn new(setup: SetupConfig, toolchain_dir: PathBuf, step_timeout: Duration) -> Self {
        Self {
            setup,
            toolchain_dir,
            step_timeout,
        }
    }

    fn install_plan(&self) -> RecoveryPlan {
        RecoveryPlan::new(self.setup.install.as_slice().iter().cloned())
    }

    fn sync_plan(&self) -> RecoveryPlan {
        RecoveryPlan::new(self.setup.sync.as_slice().iter().cloned())
    }
}

impl SetupPipeline for CommandPipeline {
    async fn check_toolchain(&self) -> Result<Vec<ToolVersion>, SetupError> {
        let mut versions = Vec::with_capacity(self.setup.toolchain.len());
        for command in &self.setup.toolchain {
            let version = run_step(command, &self.toolchain_dir, &BTreeMap::new(), self.step_timeout)
                .await
                .map_err(|e| SetupError::ToolchainMissing {
                    command: command.clone(),
                    detail: e.to_string(),
                })?;
            info!("{}: {}", command, version);
            versions.push(ToolVersion {
                command: command.clone(),
                version,
            });
        }
        Ok(versions)
    }

    async fn clean_caches(&self, service: &ServiceSpec, mode: RebootMode) -> usize {
        let caches = match mode {
            RebootMode::Full => &self.setup.caches,
            RebootMode::Fast => &self.setup.fast_caches,
        };
        let mut removed = 0;
        for cache in caches {
            let path = service.dir.join(cache);
            if !path.exists() {
                debug!(service = %service.id, "no {} to remove", cache);
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!(service = %service.id, "removed {}", cache);
                    removed += 1;
                }
                // Usually a file lock held by a process that is still exiting.
                Err(e) => warn!(service = %service.id, error = %e, "could not remove {}", cache),
            }
        }
        removed
    }

    fn dependencies_present(&self, service: &ServiceSpec) -> bool {
        match &self.setup.deps_marker {
            Some(marker) => service.dir.join(marker).exists(),
            None => true,
        }
    }

    async fn provision_dependencies(&self, service: &ServiceSpec) -> Result<(), SetupError> {
        let plan = self.install_plan();
        if plan.is_empty() {
            warn!(service = %service.id, "dependencies missing and no install command configured");
            return Ok(());
        }
        info!(service = %service.id, "installing dependencies");
        plan.run(|command| async move {
            run_step(&command, &service.dir, &service.env, self.step_timeout)
                .await
                .map(|_| ())
        })
        .await
        .map(|_| ())
        .map_err(|attempts| SetupError::ProvisionFailed {
            id: service.id.clone(),
            attempts,
        })
    }

    fn schema_present(&self, service: &ServiceSpec) -> bool {
        self.setup
            .schema
            .as_ref()
            .is_some_and(|schema| service.dir.join(schema).is_file())
    }

    async fn generate_client(&self, service: &ServiceSpec) -> Result<(), SetupError> {
        let Some(command) = &self.setup.generate else {
            return Ok(());
        };
        info!(service = %service.id, "generating client");
        run_step(command, &service.dir, &service.env, self.step_timeout)
            .await
            .map(|_| ())
            .map_err(|e| SetupError::GenerateFailed {
                id: service.id.clone(),
                detail: e.to_string(),
            })
    }

    async fn sync_schema(&self, service: &ServiceSpec) -> Result<(), SyncError> {
        let plan = self.sync_plan();
        if plan.is_empty() {
            return Ok(());
        }
        info!(service = %service.id, "syncing schema");
        plan.run(|command| async move {
            run_step(&command, &service.dir, &service.env, self.step_timeout)
                .await
                .map(|_| ())
        })
        .await
        .map(|_| ())
        .map_err(|attempts| SyncError {
            id: service.id.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &Path) -> ServiceSpec {
        ServiceSpec {
            id: "web".to_string(),
            name: "Web".to_string(),
            port: 3020,
            dir: dir.to_path_buf(),
            command: "npm run dev".to_string(),
            env: BTreeMap::new(),
            enabled: true,
            required: true,
        }
    }

    fn setup_toml(toml: &str) -> SetupConfig {
        toml::from_str(toml).unwrap()
    }

    fn pipeline(setup: SetupConfig, dir: &Path) -> CommandPipeline {
        CommandPipeline::new(setup, dir.to_path_buf(), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn recovery_plan_stops_at_first_success() {
        let plan = RecoveryPlan::new(["a", "b", "c"].map(String::from));
        let mut tried = Vec::new();
        let result = plan
            .run(|action| {
                tried.push(action.clone());
                async move {
                    if action == "b" {
                        Ok(())
                    } else {
                        Err("nope")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(tried, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn recovery_plan_exhausts() {
        let plan = RecoveryPlan::new(["a", "b"].map(String::from));
        let result = plan.run(|_| async { Err::<(), _>("nope") }).await;
        assert_eq!(result, Err(2));
    }

    #[tokio::test]
    async fn fast_mode_keeps_build_caches() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".next/cache")).unwrap();
        std::fs::create_dir_all(tmp.path().join(".turbo")).unwrap();
        let p = pipeline(
            setup_toml("caches = [\".next\"]\nfast_caches = [\".turbo\"]\ninstall = \"exit 1\"\ndeps_marker = \"node_modules\""),
            tmp.path(),
        );

        let outcome = prepare_service(&p, &service(tmp.path()), RebootMode::Fast).await.unwrap();
        assert_eq!(outcome.caches_removed, 1);
        assert!(!outcome.provisioned);
        assert!(tmp.path().join(".next/cache").exists());
        assert!(!tmp.path().join(".turbo").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_mode_cleans_and_falls_back_to_second_install() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".next")).unwrap();
        let p = pipeline(
            setup_toml("caches = [\".next\"]\ndeps_marker = \"node_modules\"\ninstall = [\"exit 1\", \"mkdir node_modules\"]"),
            tmp.path(),
        );

        let outcome = prepare_service(&p, &service(tmp.path()), RebootMode::Full).await.unwrap();
        assert!(outcome.provisioned);
        assert!(!tmp.path().join(".next").exists());
        assert!(tmp.path().join("node_modules").is_dir());
        assert_eq!(outcome.synced, None);

        // Marker present now: no second install.
        let again = prepare_service(&p, &service(tmp.path()), RebootMode::Full).await.unwrap();
        assert!(!again.provisioned);
    }

    #[tokio::test]
    async fn exhausted_install_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(
            setup_toml("deps_marker = \"node_modules\"\ninstall = [\"exit 1\", \"exit 2\"]"),
            tmp.path(),
        );
        let err = prepare_service(&p, &service(tmp.path()), RebootMode::Full).await.unwrap_err();
        assert!(matches!(err, SetupError::ProvisionFailed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn generate_failure_is_fatal_but_sync_failure_is_not() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("prisma")).unwrap();
        std::fs::write(tmp.path().join("prisma/schema.prisma"), "").unwrap();

        let failing_generate = pipeline(
            setup_toml("schema = \"prisma/schema.prisma\"\ngenerate = \"exit 1\""),
            tmp.path(),
        );
        let err = prepare_service(&failing_generate, &service(tmp.path()), RebootMode::Full)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::GenerateFailed { .. }));

        let failing_sync = pipeline(
            setup_toml("schema = \"prisma/schema.prisma\"\ngenerate = \"exit 0\"\nsync = [\"exit 1\", \"exit 1\"]"),
            tmp.path(),
        );
        let outcome = prepare_service(&failing_sync, &service(tmp.path()), RebootMode::Full)
            .await
            .unwrap();
        assert!(outcome.generated);
        assert_eq!(outcome.synced, Some(false));
    }

    #[tokio::test]
    async fn sync_falls_back_until_one_succeeds() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("prisma")).unwrap();
        std::fs::write(tmp.path().join("prisma/schema.prisma"), "").unwrap();
        let p = pipeline(
            setup_toml("schema = \"prisma/schema.prisma\"\nsync = [\"exit 1\", \"echo pushed\"]"),
            tmp.path(),
        );

        let outcome = prepare_service(&p, &service(tmp.path()), RebootMode::Full).await.unwrap();
        assert_eq!(outcome.synced, Some(true));
    }

    #[tokio::test]
    async fn schema_steps_skipped_without_schema() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(
            setup_toml("schema = \"prisma/schema.prisma\"\ngenerate = \"exit 1\""),
            tmp.path(),
        );
        let outcome = prepare_service(&p, &service(tmp.path()), RebootMode::Full).await.unwrap();
        assert!(!outcome.generated);
        assert_eq!(outcome.synced, None);
    }

    #[tokio::test]
    async fn missing_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(SetupConfig::default(), tmp.path());
        let err = prepare_service(&p, &service(&tmp.path().join("auth")), RebootMode::Fast)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::MissingDirectory { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn toolchain_reports_versions_or_fails() {
        let tmp = TempDir::new().unwrap();
        let ok = pipeline(setup_toml("toolchain = [\"echo v20.11.0\"]"), tmp.path());
        let versions = ok.check_toolchain().await.unwrap();
        assert_eq!(versions[0].version.lines().last(), Some("v20.11.0"));

        let missing = pipeline(
            setup_toml("toolchain = [\"definitely-not-a-real-tool-xyz --version\"]"),
            tmp.path(),
        );
        assert!(matches!(
            missing.check_toolchain().await,
            Err(SetupError::ToolchainMissing { .. })
        ));
    }

    #[tokio::test]
    async fn step_timeout_is_enforced() {
        let tmp = TempDir::new().unwrap();
        let err = run_step(
            crate::platform::test_commands::sleep_long(),
            tmp.path(),
            &BTreeMap::new(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StepFailure::Timeout(_)));
    }
}
