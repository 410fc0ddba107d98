//! Runtime driver implementations.
//!
//! Both drivers speak the runc-compatible CLI (`runc`, `crun`, `youki`):
//!
//! - [`RunDriver`]: one `run` invocation; the runtime process is the one
//!   the supervisor waits on.
//! - [`CreateStartDriver`]: `create`, `start`, then `delete` after exit; the
//!   container init is adopted and waited on directly.

pub mod create_start;
pub mod run;

pub use self::create_start::CreateStartDriver;
pub use self::run::RunDriver;

use crate::config::{DriverKind, EngineConfig};
use crate::constants::RUNTIME_COMMAND_TIMEOUT;
use crate::error::{Diagnostic, Error, Result};
use crate::runtime::{RuntimeDriver, Signal, send_signal};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Builds the driver selected by `config.driver`.
pub fn driver_for(config: &EngineConfig) -> Arc<dyn RuntimeDriver> {
    let cli = RuntimeCli::new(&config.runtime_executable, config.runtime_state_root.clone());
    match config.driver {
        DriverKind::Run => Arc::new(RunDriver::new(cli)),
        DriverKind::CreateStart => Arc::new(CreateStartDriver::new(cli)),
    }
}

// =============================================================================
// Runtime CLI
// =============================================================================

/// Invocation details shared by the drivers.
#[derive(Debug, Clone)]
pub struct RuntimeCli {
    executable: PathBuf,
    state_root: Option<PathBuf>,
}

impl RuntimeCli {
    /// Creates a CLI wrapper for `executable`, optionally with `--root`.
    pub fn new(executable: impl Into<PathBuf>, state_root: Option<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            state_root,
        }
    }

    /// Runtime executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// A command with global flags applied and stdin detached.
    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        if let Some(root) = &self.state_root {
            cmd.arg("--root").arg(root);
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Runs a short lifecycle subcommand and collects its output.
    pub(crate) async fn invoke<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(RUNTIME_COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                Error::Internal(format!(
                    "{} did not finish within {:?}",
                    self.executable.display(),
                    RUNTIME_COMMAND_TIMEOUT
                ))
            })?
            .map_err(|e| Error::io(format!("failed to invoke {}", self.executable.display()), e))?;
        Ok(output)
    }

    /// Asks the runtime to signal the container, falling back to a direct
    /// signal to `pid` when the runtime refuses.
    pub(crate) async fn kill(&self, id: &str, pid: u32, signal: Signal) -> Result<()> {
        match self.invoke(["kill", id, signal.short_name()]).await {
            Ok(out) if out.status.success() => {
                debug!("Runtime delivered {} to {}", signal, id);
                return Ok(());
            }
            Ok(out) => debug!(
                "Runtime kill of {} exited with {}: {}",
                id,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Err(e) => debug!("Runtime kill of {} failed: {}", id, e),
        }
        send_signal(pid, signal)
    }

    /// Removes runtime state for `id`. A container the runtime no longer
    /// knows is not an error.
    pub(crate) async fn delete(&self, id: &str) -> Result<()> {
        let out = self.invoke(["delete", "--force", id]).await?;
        if !out.status.success() {
            debug!(
                "Runtime delete of {} exited with {}: {}",
                id,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    /// `LaunchFailed` for this runtime.
    pub(crate) fn launch_failed(&self, id: &str, found: impl Into<String>) -> Error {
        Error::LaunchFailed {
            id: id.to_string(),
            runtime: self.executable.display().to_string(),
            diagnostic: Diagnostic::new(
                format!("an OCI runtime at {} that accepts the bundle", self.executable.display()),
                found,
                "install runc or crun, or set runtime_executable to an OCI-compatible runtime",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_for_selects_kind() {
        let config = EngineConfig::default();
        assert_eq!(driver_for(&config).name(), "run");

        let config = config.with_driver(DriverKind::CreateStart);
        assert_eq!(driver_for(&config).name(), "create-start");
    }

    #[test]
    fn test_launch_failed_names_runtime() {
        let cli = RuntimeCli::new("/usr/bin/crun", None);
        let err = cli.launch_failed("task-1", "permission denied");
        assert!(matches!(err, Error::LaunchFailed { ref runtime, .. } if runtime == "/usr/bin/crun"));
        assert!(err.to_string().contains("permission denied"));
    }
}
