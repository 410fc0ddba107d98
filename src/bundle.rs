//! OCI Runtime Bundle building.
//!
//! Turns a validated archive, a host runtime location and task configuration
//! into an OCI runtime-spec `config.json` plus an empty `rootfs`. The root
//! filesystem is assembled entirely from mounts: host system directories
//! (read-only), the archive, and the runtime home. The result is consumed by
//! runtimes like runc, crun or youki.
//!
//! ## Mount Order
//!
//! ```text
//! /proc  /dev  /dev/pts  /dev/shm  /sys  /sys/fs/cgroup   kernel filesystems
//! /bin  /lib  /usr/bin  /usr/lib  ...                       system (ro bind)
//! /app/app.jar                                              archive (ro bind)
//! /opt/java                                                 runtime (ro bind)
//! ```
//!
//! A later mount never shadows an earlier one; the builder rejects
//! configurations that would.

use crate::artifact::ValidatedArtifact;
use crate::config::{EngineConfig, ResourceLimits, TaskConfig};
use crate::constants::{
    CONFIG_FILE, DEFAULT_DEV_TMPFS_SIZE_KB, DEFAULT_HOSTNAME, DEFAULT_PATH_TAIL,
    DEFAULT_RUNTIME_BINARY, DEFAULT_OPTIONAL_SYSTEM_MOUNTS, DEFAULT_RUNTIME_HOME_VAR, DEFAULT_SHM_SIZE_KB, DEFAULT_SYSTEM_MOUNTS,
    OCI_RUNTIME_SPEC_VERSION, ROOTFS_DIR,
};
use crate::error::{Diagnostic, Error, Result};
use crate::locator::RuntimeLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Container Bundle
// =============================================================================

/// A complete container specification. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerBundle {
    spec: OciSpec,
}

impl ContainerBundle {
    /// Returns the underlying OCI spec.
    pub fn spec(&self) -> &OciSpec {
        &self.spec
    }

    /// Process argument vector.
    pub fn args(&self) -> &[String] {
        &self.spec.process.args
    }

    /// Environment as `KEY=VALUE`, sorted by key.
    pub fn env(&self) -> &[String] {
        &self.spec.process.env
    }

    /// Mounts in application order.
    pub fn mounts(&self) -> &[OciMount] {
        &self.spec.mounts
    }

    /// Root filesystem path, relative to the bundle directory.
    pub fn root_path(&self) -> &str {
        &self.spec.root.path
    }

    /// Process working directory inside the container.
    pub fn cwd(&self) -> &str {
        &self.spec.process.cwd
    }

    /// Serializes to `config.json` bytes. Identical inputs give identical bytes.
    pub fn to_config_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.spec)
            .map_err(|e| Error::Serialization(format!("failed to serialize config: {}", e)))
    }

    /// Writes `config.json` and an empty `rootfs` into `dir`.
    ///
    /// Returns the path of the written `config.json`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let rootfs = dir.join(&self.spec.root.path);
        fs::create_dir_all(&rootfs).map_err(|e| Error::io_at("create rootfs", &rootfs, e))?;

        let config_path = dir.join(CONFIG_FILE);
        let json = self.to_config_json()?;
        fs::write(&config_path, json).map_err(|e| Error::io_at("write", &config_path, e))?;

        debug!("Wrote bundle spec {}", config_path.display());
        Ok(config_path)
    }
}

// =============================================================================
// Bundle Builder
// =============================================================================

/// Builder for task container bundles.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    runtime_home_var: String,
    system_mounts: Vec<PathBuf>,
    optional_system_mounts: Vec<PathBuf>,
    dev_tmpfs_size_kb: u64,
    shm_size_kb: u64,
    hostname: String,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleBuilder {
    /// Creates a builder with the default system mounts and sizes.
    pub fn new() -> Self {
        Self {
            runtime_home_var: DEFAULT_RUNTIME_HOME_VAR.to_string(),
            system_mounts: DEFAULT_SYSTEM_MOUNTS.iter().map(PathBuf::from).collect(),
            optional_system_mounts: DEFAULT_OPTIONAL_SYSTEM_MOUNTS
                .iter()
                .map(PathBuf::from)
                .collect(),
            dev_tmpfs_size_kb: DEFAULT_DEV_TMPFS_SIZE_KB,
            shm_size_kb: DEFAULT_SHM_SIZE_KB,
            hostname: DEFAULT_HOSTNAME.to_string(),
        }
    }

    /// Creates a builder from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            runtime_home_var: config.runtime_home_var.clone(),
            system_mounts: config.system_mounts.clone(),
            optional_system_mounts: config.optional_system_mounts.clone(),
            dev_tmpfs_size_kb: config.dev_tmpfs_size_kb,
            shm_size_kb: config.shm_size_kb,
            hostname: config.hostname.clone(),
        }
    }

    /// Sets the host system directories to bind-mount.
    pub fn with_system_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.system_mounts = mounts;
        self
    }

    /// Sets the host system directories bind-mounted only when present.
    pub fn with_optional_system_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.optional_system_mounts = mounts;
        self
    }

    /// Builds a bundle. Fails before anything is written if a required host
    /// path is missing or the mount layout would shadow itself.
    pub fn build(
        &self,
        artifact: &ValidatedArtifact,
        runtime: &RuntimeLocation,
        config: &TaskConfig,
    ) -> Result<ContainerBundle> {
        config.validate()?;
        self.check_host_paths(artifact, runtime)?;

        let runtime_mount = config.runtime_mount.trim_end_matches('/').to_string();
        let archive_mount = config.archive_mount.clone();

        let env = self.environment(&runtime_mount, &config.env)?;
        let args = self.arguments(runtime, &runtime_mount, &archive_mount, config);
        let cwd = config.cwd.clone().unwrap_or_else(|| parent_dir(&archive_mount));

        let system_mounts = self.present_system_mounts();
        let mut mounts = self.kernel_mounts();
        mounts.extend(system_mounts.iter().map(|path| {
            let path = path.to_string_lossy().to_string();
            OciMount::bind(&path, &path, &["rbind", "ro", "nosuid", "nodev"])
        }));
        mounts.push(OciMount::bind(
            &artifact.path.to_string_lossy(),
            &archive_mount,
            &["bind", "ro", "nosuid", "nodev"],
        ));
        mounts.push(OciMount::bind(
            &runtime.home.to_string_lossy(),
            &runtime_mount,
            &["rbind", "ro", "nosuid", "nodev"],
        ));
        Self::check_mount_order(&mounts, &system_mounts, &[&archive_mount, &runtime_mount])?;

        let spec = OciSpec {
            oci_version: OCI_RUNTIME_SPEC_VERSION.to_string(),
            root: OciRoot {
                path: ROOTFS_DIR.to_string(),
                readonly: false,
            },
            process: OciProcess {
                terminal: false,
                user: OciUser {
                    uid: config.user_id.unwrap_or(0),
                    gid: config.group_id.unwrap_or(0),
                },
                args,
                env,
                cwd,
                no_new_privileges: true,
            },
            hostname: self.hostname.clone(),
            mounts,
            linux: Some(OciLinux {
                namespaces: ["pid", "ipc", "uts", "mount"]
                    .iter()
                    .map(|ns| OciNamespace {
                        ns_type: ns.to_string(),
                        path: None,
                    })
                    .collect(),
                resources: resources(&config.resources),
            }),
        };

        info!(
            "Built bundle for {} with runtime {}",
            artifact.path.display(),
            runtime.home.display()
        );
        Ok(ContainerBundle { spec })
    }

    /// Required system mounts followed by the optional ones found on the host.
    fn present_system_mounts(&self) -> Vec<PathBuf> {
        let mut mounts = self.system_mounts.clone();
        for path in &self.optional_system_mounts {
            if !path.exists() {
                debug!("Skipping absent optional system mount {}", path.display());
            } else if !mounts.contains(path) {
                mounts.push(path.clone());
            }
        }
        mounts
    }

    /// Verifies every host path the mounts reference.
    fn check_host_paths(&self, artifact: &ValidatedArtifact, runtime: &RuntimeLocation) -> Result<()> {
        let mut missing = Vec::new();

        for mount in &self.system_mounts {
            if !mount.exists() {
                missing.push(format!("system mount {}", mount.display()));
            }
        }
        if !artifact.path.is_file() {
            missing.push(format!("archive {}", artifact.path.display()));
        }
        if !runtime.home.is_dir() {
            missing.push(format!("runtime home {}", runtime.home.display()));
        } else if !runtime.binary.is_file() {
            missing.push(format!("runtime binary {}", runtime.binary.display()));
        }

        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::BundleIncomplete {
            diagnostic: Diagnostic::new(
                "every host path referenced by the bundle to exist",
                format!("missing: {}", missing.join(", ")),
                "install the missing directories or remove them from system_mounts; \
                 a container started without them fails inside the runtime",
            ),
        })
    }

    /// Rejects layouts where a later mount would hide an earlier one, or
    /// where a task mount sits under a read-only system mount.
    fn check_mount_order(
        mounts: &[OciMount],
        system_mounts: &[PathBuf],
        task_mounts: &[&str],
    ) -> Result<()> {
        for (later_idx, later) in mounts.iter().enumerate() {
            let later_dest = Path::new(&later.destination);
            if let Some(earlier) = mounts[..later_idx]
                .iter()
                .find(|earlier| Path::new(&earlier.destination).starts_with(later_dest))
            {
                return Err(Error::BundleIncomplete {
                    diagnostic: Diagnostic::new(
                        "mounts ordered so that no mount hides an earlier one",
                        format!(
                            "{} would shadow {}",
                            later.destination, earlier.destination
                        ),
                        "move the archive or runtime mount to a path of its own",
                    ),
                });
            }
        }

        for dest in task_mounts {
            if let Some(system) = system_mounts
                .iter()
                .find(|system| Path::new(dest).starts_with(system))
            {
                return Err(Error::BundleIncomplete {
                    diagnostic: Diagnostic::new(
                        "archive and runtime mounts outside read-only system mounts",
                        format!("{} is inside {}", dest, system.display()),
                        "choose an archive_mount/runtime_mount such as /app or /opt",
                    ),
                });
            }
        }
        Ok(())
    }

    /// Builds the sorted `KEY=VALUE` list.
    fn environment(
        &self,
        runtime_mount: &str,
        task_env: &BTreeMap<String, String>,
    ) -> Result<Vec<String>> {
        let mut env = BTreeMap::new();
        for (key, value) in task_env {
            if key.is_empty() || key.contains('=') {
                return Err(Error::Config(format!("invalid environment variable name '{}'", key)));
            }
            env.insert(key.clone(), value.clone());
        }

        if env.contains_key(&self.runtime_home_var) {
            warn!(
                "Ignoring task-supplied {}; it always names the mounted runtime",
                self.runtime_home_var
            );
        }
        env.insert(self.runtime_home_var.clone(), runtime_mount.to_string());
        env.entry("PATH".to_string())
            .or_insert_with(|| format!("{}/bin:{}", runtime_mount, DEFAULT_PATH_TAIL));

        Ok(env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect())
    }

    /// `<runtime>/bin/java [jvm options] -jar <archive> [args]`
    fn arguments(
        &self,
        runtime: &RuntimeLocation,
        runtime_mount: &str,
        archive_mount: &str,
        config: &TaskConfig,
    ) -> Vec<String> {
        let relative = runtime
            .binary
            .strip_prefix(&runtime.home)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| DEFAULT_RUNTIME_BINARY.to_string());

        let mut args = vec![format!("{}/{}", runtime_mount, relative)];
        args.extend(config.jvm_options.iter().cloned());
        args.push("-jar".to_string());
        args.push(archive_mount.to_string());
        args.extend(config.args.iter().cloned());
        args
    }

    /// Kernel filesystems every process needs.
    fn kernel_mounts(&self) -> Vec<OciMount> {
        vec![
            OciMount {
                destination: "/proc".to_string(),
                mount_type: "proc".to_string(),
                source: "proc".to_string(),
                options: vec![],
            },
            OciMount {
                destination: "/dev".to_string(),
                mount_type: "tmpfs".to_string(),
                source: "tmpfs".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "strictatime".to_string(),
                    "mode=755".to_string(),
                    format!("size={}k", self.dev_tmpfs_size_kb),
                ],
            },
            OciMount {
                destination: "/dev/pts".to_string(),
                mount_type: "devpts".to_string(),
                source: "devpts".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "noexec".to_string(),
                    "newinstance".to_string(),
                    "ptmxmode=0666".to_string(),
                    "mode=0620".to_string(),
                ],
            },
            OciMount {
                destination: "/dev/shm".to_string(),
                mount_type: "tmpfs".to_string(),
                source: "shm".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "noexec".to_string(),
                    "nodev".to_string(),
                    "mode=1777".to_string(),
                    format!("size={}k", self.shm_size_kb),
                ],
            },
            OciMount {
                destination: "/sys".to_string(),
                mount_type: "sysfs".to_string(),
                source: "sysfs".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "noexec".to_string(),
                    "nodev".to_string(),
                    "ro".to_string(),
                ],
            },
            OciMount {
                destination: "/sys/fs/cgroup".to_string(),
                mount_type: "cgroup".to_string(),
                source: "cgroup".to_string(),
                options: vec![
                    "nosuid".to_string(),
                    "noexec".to_string(),
                    "nodev".to_string(),
                    "relatime".to_string(),
                    "ro".to_string(),
                ],
            },
        ]
    }
}

fn parent_dir(container_path: &str) -> String {
    match Path::new(container_path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().to_string(),
        _ => "/".to_string(),
    }
}

fn resources(limits: &ResourceLimits) -> Option<OciResources> {
    if limits == &ResourceLimits::default() {
        return None;
    }
    Some(OciResources {
        memory: limits.memory_mb.map(|mb| OciMemory {
            limit: Some(i64::try_from(mb).unwrap_or(i64::MAX).saturating_mul(1024 * 1024)),
        }),
        cpu: limits.cpu_shares.map(|shares| OciCpu {
            shares: Some(shares),
            quota: None,
            period: None,
        }),
        pids: limits.pids.map(|limit| OciPids { limit }),
    })
}

// =============================================================================
// OCI Runtime Spec Types
// =============================================================================

/// OCI Runtime Spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciSpec {
    pub oci_version: String,
    pub root: OciRoot,
    pub process: OciProcess,
    pub hostname: String,
    pub mounts: Vec<OciMount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<OciLinux>,
}

/// OCI root filesystem config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciRoot {
    pub path: String,
    pub readonly: bool,
}

/// OCI process config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciProcess {
    pub terminal: bool,
    pub user: OciUser,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// OCI user config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciUser {
    pub uid: u32,
    pub gid: u32,
}

/// OCI mount config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl OciMount {
    /// A bind mount of `source` at `destination`.
    pub fn bind(source: &str, destination: &str, options: &[&str]) -> Self {
        Self {
            destination: destination.to_string(),
            mount_type: "bind".to_string(),
            source: source.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }

    /// True for read-only mounts.
    pub fn is_readonly(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// OCI Linux-specific config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciLinux {
    pub namespaces: Vec<OciNamespace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<OciResources>,
}

/// OCI namespace config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciNamespace {
    #[serde(rename = "type")]
    pub ns_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// OCI resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<OciMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<OciCpu>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids: Option<OciPids>,
}

/// OCI memory limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciMemory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// OCI CPU limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciCpu {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
}

/// OCI PID limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OciPids {
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/app/app.jar"), "/app");
        assert_eq!(parent_dir("/app.jar"), "/");
        assert_eq!(parent_dir("/srv/task/lib/app.jar"), "/srv/task/lib");
    }

    #[test]
    fn test_resources_omitted_when_undeclared() {
        assert!(resources(&ResourceLimits::default()).is_none());

        let limits = ResourceLimits {
            memory_mb: Some(512),
            cpu_shares: None,
            pids: Some(128),
        };
        let res = resources(&limits).unwrap();
        assert_eq!(res.memory.unwrap().limit, Some(512 * 1024 * 1024));
        assert!(res.cpu.is_none());
        assert_eq!(res.pids.unwrap().limit, 128);
    }

    #[test]
    fn test_huge_memory_limit_saturates() {
        for mb in [u64::MAX, i64::MAX as u64 / 1024] {
            let limits = ResourceLimits {
                memory_mb: Some(mb),
                cpu_shares: None,
                pids: None,
            };
            let res = resources(&limits).unwrap();
            assert_eq!(res.memory.unwrap().limit, Some(i64::MAX), "memory_mb {}", mb);
        }
    }

    #[test]
    fn test_kernel_mount_sizes_bounded() {
        let mounts = BundleBuilder::new().kernel_mounts();
        let dev = mounts.iter().find(|m| m.destination == "/dev").unwrap();
        assert!(dev.options.iter().any(|o| o.starts_with("size=")));
        assert!(mounts.iter().any(|m| m.mount_type == "proc"));
    }
}
