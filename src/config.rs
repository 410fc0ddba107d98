//! Engine and task configuration.
//!
//! [`EngineConfig`] is injected into every [`TaskHandle`](crate::task::TaskHandle)
//! at construction; there is no process-wide configuration. [`TaskConfig`] is
//! the per-task part the orchestrator forwards from the job definition, and
//! [`TaskSpec`] bundles it with the task directory and discovery hints.
//!
//! Both config structs deserialize from JSON with every field optional:
//!
//! ```json
//! {
//!   "runtime_executable": "/usr/local/bin/crun",
//!   "driver": "create_start",
//!   "discovery": { "mode": "recursive", "max_depth": 2 },
//!   "manifest_policy": "require"
//! }
//! ```

use crate::constants::{
    BUNDLE_DIR, DEFAULT_ARCHIVE_EXTENSION, DEFAULT_ARCHIVE_MOUNT, DEFAULT_DEV_TMPFS_SIZE_KB,
    DEFAULT_HOSTNAME, DEFAULT_RUNTIME_BINARY, DEFAULT_RUNTIME_EXECUTABLE,
    DEFAULT_RUNTIME_FALLBACKS, DEFAULT_RUNTIME_HOME_VAR, DEFAULT_RUNTIME_MOUNT,
    DEFAULT_SHM_SIZE_KB, DEFAULT_OPTIONAL_SYSTEM_MOUNTS, DEFAULT_STOP_TIMEOUT, DEFAULT_SYSTEM_MOUNTS,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Engine Options
// =============================================================================

/// How the task directory is searched for archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Discovery {
    /// Only top-level entries of the task directory.
    #[default]
    TopLevel,
    /// Descend into subdirectories up to `max_depth` levels (1 = top level).
    Recursive { max_depth: usize },
}

impl Discovery {
    /// Maximum walk depth below the task directory.
    pub fn max_depth(&self) -> usize {
        match self {
            Self::TopLevel => 1,
            Self::Recursive { max_depth } => (*max_depth).max(1),
        }
    }
}

/// What to do with a well-formed archive that lacks a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestPolicy {
    /// Record a warning note and continue.
    #[default]
    Warn,
    /// Fail validation with `Corrupt`.
    Require,
}

/// Which lifecycle protocol the external runtime is driven with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Single `run --bundle <dir> <id>` invocation.
    #[default]
    Run,
    /// Separate `create`, `start` and `delete` invocations.
    CreateStart,
}

/// Engine-wide configuration, injected per task handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// External container runtime executable (`runc`, `crun`, `youki`).
    pub runtime_executable: PathBuf,
    /// Optional `--root` state directory passed to the runtime.
    pub runtime_state_root: Option<PathBuf>,
    /// Lifecycle protocol for the runtime.
    pub driver: DriverKind,
    /// Directory under which per-task bundles are written.
    pub bundle_root: PathBuf,
    /// Keep bundle directories after the task ends (debugging aid).
    pub keep_bundles: bool,
    /// Archive extension, matched case-insensitively.
    pub archive_extension: String,
    /// Archive discovery mode.
    pub discovery: Discovery,
    /// Manifest strictness.
    pub manifest_policy: ManifestPolicy,
    /// Runtime-home override variable on the host and in the container.
    pub runtime_home_var: String,
    /// Runtime binary relative to a runtime home.
    pub runtime_binary: PathBuf,
    /// Fallback runtime locations, consulted after hints.
    pub runtime_fallbacks: Vec<PathBuf>,
    /// Host directories bind-mounted read-only into every container.
    pub system_mounts: Vec<PathBuf>,
    /// Host directories bind-mounted read-only when they exist, skipped
    /// otherwise.
    pub optional_system_mounts: Vec<PathBuf>,
    /// `/dev` tmpfs size bound in KiB.
    pub dev_tmpfs_size_kb: u64,
    /// `/dev/shm` tmpfs size bound in KiB.
    pub shm_size_kb: u64,
    /// Container hostname.
    pub hostname: String,
    /// Grace period used when `stop` is called without a timeout.
    pub stop_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_executable: PathBuf::from(DEFAULT_RUNTIME_EXECUTABLE),
            runtime_state_root: None,
            driver: DriverKind::default(),
            bundle_root: Self::default_bundle_root(),
            keep_bundles: false,
            archive_extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            discovery: Discovery::default(),
            manifest_policy: ManifestPolicy::default(),
            runtime_home_var: DEFAULT_RUNTIME_HOME_VAR.to_string(),
            runtime_binary: PathBuf::from(DEFAULT_RUNTIME_BINARY),
            runtime_fallbacks: DEFAULT_RUNTIME_FALLBACKS.iter().map(PathBuf::from).collect(),
            system_mounts: DEFAULT_SYSTEM_MOUNTS.iter().map(PathBuf::from).collect(),
            optional_system_mounts: DEFAULT_OPTIONAL_SYSTEM_MOUNTS
                .iter()
                .map(PathBuf::from)
                .collect(),
            dev_tmpfs_size_kb: DEFAULT_DEV_TMPFS_SIZE_KB,
            shm_size_kb: DEFAULT_SHM_SIZE_KB,
            hostname: DEFAULT_HOSTNAME.to_string(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT.as_secs(),
        }
    }
}

impl EngineConfig {
    /// Parses configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io_at("read", path, e))?;
        Self::from_json_str(&json)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.archive_extension.trim_start_matches('.').is_empty() {
            return Err(Error::Config("archive_extension cannot be empty".to_string()));
        }
        if self.runtime_binary.is_absolute() {
            return Err(Error::Config(format!(
                "runtime_binary must be relative to the runtime home, got {}",
                self.runtime_binary.display()
            )));
        }
        if self.runtime_home_var.is_empty() || self.runtime_home_var.contains('=') {
            return Err(Error::Config(format!(
                "runtime_home_var '{}' is not a valid variable name",
                self.runtime_home_var
            )));
        }
        if let Some(mount) = self
            .system_mounts
            .iter()
            .chain(&self.optional_system_mounts)
            .find(|m| !m.is_absolute())
        {
            return Err(Error::Config(format!(
                "system mount {} must be an absolute path",
                mount.display()
            )));
        }
        if self.dev_tmpfs_size_kb == 0 {
            return Err(Error::Config("dev_tmpfs_size_kb must be bounded and nonzero".to_string()));
        }
        Ok(())
    }

    /// Sets the runtime executable.
    pub fn with_runtime_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_executable = path.into();
        self
    }

    /// Sets the lifecycle driver.
    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }

    /// Sets the bundle root directory.
    pub fn with_bundle_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundle_root = path.into();
        self
    }

    /// Sets the host system mounts.
    pub fn with_system_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.system_mounts = mounts;
        self
    }

    /// Sets the host system mounts that are skipped when absent.
    pub fn with_optional_system_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.optional_system_mounts = mounts;
        self
    }

    /// Sets the runtime fallback locations.
    pub fn with_runtime_fallbacks(mut self, fallbacks: Vec<PathBuf>) -> Self {
        self.runtime_fallbacks = fallbacks;
        self
    }

    /// Sets the archive discovery mode.
    pub fn with_discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Sets the manifest policy.
    pub fn with_manifest_policy(mut self, policy: ManifestPolicy) -> Self {
        self.manifest_policy = policy;
        self
    }

    /// Grace period for `stop` without an explicit timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    fn default_bundle_root() -> PathBuf {
        if let Some(home) = dirs::home_dir() {
            home.join(".jarbox").join(BUNDLE_DIR)
        } else {
            PathBuf::from(".jarbox").join(BUNDLE_DIR)
        }
    }
}

// =============================================================================
// Task Configuration
// =============================================================================

/// Resource limits passed through to the bundle's `linux.resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory limit in MiB.
    pub memory_mb: Option<u64>,
    /// Relative CPU weight (cgroup shares).
    pub cpu_shares: Option<u64>,
    /// Maximum number of processes.
    pub pids: Option<i64>,
}

/// Per-task options forwarded by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// In-container path the archive is mounted at.
    pub archive_mount: String,
    /// In-container path the runtime home is mounted at.
    pub runtime_mount: String,
    /// Arguments appended after the archive reference.
    pub args: Vec<String>,
    /// Runtime options placed before `-jar`.
    pub jvm_options: Vec<String>,
    /// Extra environment for the process.
    pub env: BTreeMap<String, String>,
    /// Working directory; defaults to the archive mount's parent.
    pub cwd: Option<String>,
    /// Declared resource limits.
    pub resources: ResourceLimits,
    /// Process user ID inside the container.
    pub user_id: Option<u32>,
    /// Process group ID inside the container.
    pub group_id: Option<u32>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            archive_mount: DEFAULT_ARCHIVE_MOUNT.to_string(),
            runtime_mount: DEFAULT_RUNTIME_MOUNT.to_string(),
            args: Vec::new(),
            jvm_options: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            resources: ResourceLimits::default(),
            user_id: None,
            group_id: None,
        }
    }
}

impl TaskConfig {
    /// Parses task configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks that in-container paths are usable.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("archive_mount", &self.archive_mount),
            ("runtime_mount", &self.runtime_mount),
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(Error::Config(format!(
                    "{} must be an absolute non-root container path, got '{}'",
                    name, path
                )));
            }
        }
        if self.archive_mount.trim_end_matches('/') == self.runtime_mount.trim_end_matches('/') {
            return Err(Error::Config(
                "archive_mount and runtime_mount must differ".to_string(),
            ));
        }
        if let Some(cwd) = &self.cwd
            && !cwd.starts_with('/')
        {
            return Err(Error::Config(format!("cwd must be absolute, got '{}'", cwd)));
        }
        Ok(())
    }
}

// =============================================================================
// Task Specification
// =============================================================================

/// Immutable description of one task, supplied once at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Directory the orchestrator populated with the task's artifacts.
    pub task_dir: PathBuf,
    /// Per-task options.
    pub config: TaskConfig,
    /// Explicit archive, relative to `task_dir` or absolute inside it.
    pub archive: Option<PathBuf>,
    /// Runtime home to try before the fallback locations.
    pub runtime_hint: Option<PathBuf>,
}

impl TaskSpec {
    /// Creates a spec for a task directory with default options.
    pub fn new(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
            config: TaskConfig::default(),
            archive: None,
            runtime_hint: None,
        }
    }

    /// Sets the task configuration.
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Names the archive explicitly instead of discovering it.
    pub fn with_archive(mut self, archive: impl Into<PathBuf>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    /// Sets the runtime hint.
    pub fn with_runtime_hint(mut self, hint: impl Into<PathBuf>) -> Self {
        self.runtime_hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_partial_json() {
        let config = EngineConfig::from_json_str(
            r#"{"driver": "create_start", "discovery": {"mode": "recursive", "max_depth": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.driver, DriverKind::CreateStart);
        assert_eq!(config.discovery, Discovery::Recursive { max_depth: 2 });
        assert_eq!(config.runtime_home_var, "JAVA_HOME");
        assert_eq!(config.manifest_policy, ManifestPolicy::Warn);
    }

    #[test]
    fn test_engine_config_rejects_absolute_binary() {
        let err = EngineConfig::from_json_str(r#"{"runtime_binary": "/usr/bin/java"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_discovery_depth() {
        assert_eq!(Discovery::TopLevel.max_depth(), 1);
        assert_eq!(Discovery::Recursive { max_depth: 0 }.max_depth(), 1);
        assert_eq!(Discovery::Recursive { max_depth: 3 }.max_depth(), 3);
    }

    #[test]
    fn test_task_config_defaults() {
        let config = TaskConfig::from_json_str(r#"{"args": ["--port", "8080"]}"#).unwrap();
        assert_eq!(config.archive_mount, "/app/app.jar");
        assert_eq!(config.runtime_mount, "/opt/java");
        assert_eq!(config.args, vec!["--port", "8080"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_config_rejects_relative_mounts() {
        let config = TaskConfig {
            archive_mount: "app.jar".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TaskConfig {
            runtime_mount: "/app/app.jar".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
