//! # Engine Constants
//!
//! Documented defaults and bounds for the task-execution engine. Every
//! value that task configuration can override has its default here, so the
//! config layer and the docs agree on one source.
//!
//! ## Cross-References
//!
//! - [`crate::artifact`]: archive extension and manifest entry
//! - [`crate::locator`]: runtime-home variable and fallback locations
//! - [`crate::bundle`]: in-container paths, system mounts, `/dev` size
//! - [`crate::supervisor`]: stop grace period, bundle file names

use std::time::Duration;

// =============================================================================
// Archive Validation
// =============================================================================

/// File extension identifying a candidate archive (matched case-insensitively).
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "jar";

/// Entry whose presence marks a ZIP container as a Java archive.
pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

/// Manifest attribute naming the entry point for `java -jar`.
pub const MAIN_CLASS_ATTRIBUTE: &str = "Main-Class";

/// Maximum manifest size read into memory (1 MiB).
///
/// **Security**: A manifest is a few hundred bytes in practice; a huge one
/// is either a zip bomb or not a manifest.
pub const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

/// Default depth when recursive archive discovery is enabled.
pub const DEFAULT_RECURSIVE_DEPTH: usize = 4;

// =============================================================================
// Runtime Location
// =============================================================================

/// Environment variable naming the runtime home on the host, and the variable
/// exported into the container.
pub const DEFAULT_RUNTIME_HOME_VAR: &str = "JAVA_HOME";

/// Runtime binary, relative to a runtime home.
pub const DEFAULT_RUNTIME_BINARY: &str = "bin/java";

/// Fallback locations consulted after the override variable and hints.
///
/// A location is either a runtime home itself or a directory of them
/// (e.g. `/usr/lib/jvm/java-21-openjdk`).
pub const DEFAULT_RUNTIME_FALLBACKS: &[&str] = &["/usr/lib/jvm", "/usr/java", "/opt/java"];

// =============================================================================
// Bundle Layout
// =============================================================================

/// Default in-container path of the archive.
pub const DEFAULT_ARCHIVE_MOUNT: &str = "/app/app.jar";

/// Default in-container runtime home.
///
/// Kept outside the system library mounts so the runtime can create the
/// mountpoint without writing through a read-only bind.
pub const DEFAULT_RUNTIME_MOUNT: &str = "/opt/java";

/// Host directories bind-mounted read-only for the dynamic loader and libc.
pub const DEFAULT_SYSTEM_MOUNTS: &[&str] = &["/bin", "/lib", "/usr/bin", "/usr/lib"];

/// Host directories bind-mounted read-only only when present.
///
/// `/lib64` holds the ELF interpreter on x86_64 glibc hosts and is absent on
/// most other layouts.
pub const DEFAULT_OPTIONAL_SYSTEM_MOUNTS: &[&str] = &["/lib64", "/usr/lib64"];

/// Size bound of the `/dev` tmpfs in KiB (matches `runc spec`).
pub const DEFAULT_DEV_TMPFS_SIZE_KB: u64 = 65536;

/// Size bound of the `/dev/shm` tmpfs in KiB.
pub const DEFAULT_SHM_SIZE_KB: u64 = 65536;

/// Default `PATH` tail appended after the runtime's `bin` directory.
pub const DEFAULT_PATH_TAIL: &str = "/usr/local/bin:/usr/bin:/bin";

/// Hostname given to task containers.
pub const DEFAULT_HOSTNAME: &str = "jarbox";

/// OCI Runtime Spec version for generated `config.json`.
///
/// See: <https://github.com/opencontainers/runtime-spec/releases>
pub const OCI_RUNTIME_SPEC_VERSION: &str = "1.0.2";

/// Bundle specification file name.
pub const CONFIG_FILE: &str = "config.json";

/// Bundle root filesystem directory name.
pub const ROOTFS_DIR: &str = "rootfs";

/// Pid file written by the separate create/start lifecycle.
pub const PID_FILE: &str = "container.pid";

/// Subdirectory for generated bundles under the engine data directory.
pub const BUNDLE_DIR: &str = "bundles";

// =============================================================================
// Process Supervision
// =============================================================================

/// Default external container runtime executable.
pub const DEFAULT_RUNTIME_EXECUTABLE: &str = "runc";

/// Default graceful shutdown period (5 seconds).
///
/// Time between SIGTERM and SIGKILL during `stop` when the caller does not
/// supply its own timeout.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read buffer per forwarded stream (32 KiB).
pub const STREAM_BUFFER_SIZE: usize = 32 * 1024;

/// Exit codes above this value from a runtime that was asked to stop are
/// decoded as `128 + signal`.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Upper bound on a runtime `delete`/`kill` invocation (10 seconds).
pub const RUNTIME_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Task ID Validation
// =============================================================================

/// Valid characters for task IDs.
///
/// **Security**: Task IDs become container IDs and bundle directory names,
/// so `/` and `.` are excluded.
pub const TASK_ID_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum task ID length.
pub const MAX_TASK_ID_LEN: usize = 128;

/// Validates a task ID for use as a container ID and directory name.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[inline]
#[must_use = "validation result must be checked to ensure task ID is safe"]
pub fn validate_task_id(id: &str) -> std::result::Result<(), &'static str> {
    if id.is_empty() {
        return Err("task ID cannot be empty");
    }
    if id.len() > MAX_TASK_ID_LEN {
        return Err("task ID exceeds maximum length");
    }
    if !id.chars().all(|c| TASK_ID_VALID_CHARS.contains(c)) {
        return Err("task ID contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_task_id() {
        assert!(validate_task_id("alloc-1234_web").is_ok());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id("../escape").is_err());
        assert!(validate_task_id(&"a".repeat(MAX_TASK_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_runtime_mount_outside_system_mounts() {
        for mount in DEFAULT_SYSTEM_MOUNTS.iter().chain(DEFAULT_OPTIONAL_SYSTEM_MOUNTS) {
            assert!(
                !DEFAULT_RUNTIME_MOUNT.starts_with(mount),
                "{} would nest the runtime under a read-only bind",
                mount
            );
        }
    }
}
