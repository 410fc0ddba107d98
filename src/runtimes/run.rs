//! Combined `run` driver.
//!
//! ```text
//! <runtime> [--root R] run --bundle <dir> <id>
//! ```
//!
//! The runtime stays in the foreground for the life of the container and
//! exits with the container's status, so its own process is what the
//! supervisor waits on and the container's stdio arrives on its pipes.

use super::RuntimeCli;
use crate::error::Result;
use crate::runtime::{LaunchedProcess, ProcessHandle, RuntimeDriver, Signal};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

/// Drives a runtime through a single `run` invocation.
#[derive(Debug, Clone)]
pub struct RunDriver {
    cli: RuntimeCli,
}

impl RunDriver {
    /// Creates a driver for the given runtime CLI.
    pub fn new(cli: RuntimeCli) -> Self {
        Self { cli }
    }
}

#[async_trait]
impl RuntimeDriver for RunDriver {
    fn name(&self) -> &str {
        "run"
    }

    async fn launch(&self, id: &str, bundle: &Path) -> Result<LaunchedProcess> {
        let mut cmd = self.cli.command();
        cmd.arg("run")
            .arg("--bundle")
            .arg(bundle)
            .arg(id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning {} run for {}", self.cli.executable().display(), id);
        let mut child = cmd
            .spawn()
            .map_err(|e| self.cli.launch_failed(id, format!("spawn error: {}", e)))?;

        let pid = child
            .id()
            .ok_or_else(|| self.cli.launch_failed(id, "runtime exited before its pid was read"))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        info!("Task {} launched (runtime pid {})", id, pid);
        Ok(LaunchedProcess {
            pid,
            process: ProcessHandle::Child(child),
            stdout,
            stderr,
        })
    }

    async fn signal(&self, id: &str, pid: u32, signal: Signal) -> Result<()> {
        self.cli.kill(id, pid, signal).await
    }

    async fn cleanup(&self, id: &str) -> Result<()> {
        // `run` normally removes the container itself; a killed runtime
        // leaves it behind.
        self.cli.delete(id).await
    }
}
