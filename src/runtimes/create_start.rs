//! Separate `create` / `start` / `delete` driver.
//!
//! ```text
//! <runtime> create --bundle <dir> --pid-file <dir>/container.pid <id>
//! <runtime> start <id>
//! ... container init exits ...
//! <runtime> delete --force <id>
//! ```
//!
//! `create` exits once the container init is set up, leaving the init
//! orphaned. The engine marks itself a child subreaper first, so the init is
//! re-parented to it and can be reaped with an ordinary `waitpid`. The init
//! inherits `create`'s stdout/stderr, which is how its output reaches the
//! streamer.

use super::RuntimeCli;
use crate::constants::PID_FILE;
use crate::error::{Error, Result};
use crate::runtime::{LaunchedProcess, ProcessHandle, RuntimeDriver, Signal};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Drives a runtime through separate create and start steps.
#[derive(Debug, Clone)]
pub struct CreateStartDriver {
    cli: RuntimeCli,
}

impl CreateStartDriver {
    /// Creates a driver for the given runtime CLI.
    pub fn new(cli: RuntimeCli) -> Self {
        Self { cli }
    }

    async fn read_pid(&self, id: &str, pid_file: &Path) -> Result<u32> {
        let contents = tokio::fs::read_to_string(pid_file).await.map_err(|e| {
            self.cli
                .launch_failed(id, format!("no pid file at {}: {}", pid_file.display(), e))
        })?;
        contents.trim().parse::<u32>().map_err(|_| {
            self.cli.launch_failed(
                id,
                format!("unparseable pid file {}: {:?}", pid_file.display(), contents.trim()),
            )
        })
    }

    /// Tears down a container whose start failed and reaps its init.
    async fn abandon(&self, id: &str, pid: Option<u32>) {
        if let Err(e) = self.cli.delete(id).await {
            warn!("Failed to delete abandoned container {}: {}", id, e);
        }
        if let Some(pid) = pid {
            tokio::spawn(async move {
                let _ = ProcessHandle::Adopted { pid }.wait().await;
            });
        }
    }
}

#[async_trait]
impl RuntimeDriver for CreateStartDriver {
    fn name(&self) -> &str {
        "create-start"
    }

    async fn launch(&self, id: &str, bundle: &Path) -> Result<LaunchedProcess> {
        become_subreaper().map_err(|e| self.cli.launch_failed(id, e.to_string()))?;

        let pid_file = bundle.join(PID_FILE);
        let mut cmd = self.cli.command();
        cmd.arg("create")
            .arg("--bundle")
            .arg(bundle)
            .arg("--pid-file")
            .arg(&pid_file)
            .arg(id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Spawning {} create for {}", self.cli.executable().display(), id);
        let mut create = cmd
            .spawn()
            .map_err(|e| self.cli.launch_failed(id, format!("spawn error: {}", e)))?;
        let stdout = create.stdout.take();
        let stderr = create.stderr.take();

        let status = create
            .wait()
            .await
            .map_err(|e| self.cli.launch_failed(id, format!("create wait error: {}", e)))?;
        if !status.success() {
            self.abandon(id, None).await;
            return Err(self.cli.launch_failed(id, format!("create exited with {}", status)));
        }

        let pid = match self.read_pid(id, &pid_file).await {
            Ok(pid) => pid,
            Err(e) => {
                self.abandon(id, None).await;
                return Err(e);
            }
        };

        let started = self.cli.invoke(["start", id]).await;
        let failure = match started {
            Ok(out) if out.status.success() => None,
            Ok(out) => Some(format!(
                "start exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Err(e) => Some(e.to_string()),
        };
        if let Some(found) = failure {
            self.abandon(id, Some(pid)).await;
            return Err(self.cli.launch_failed(id, found));
        }

        info!("Task {} launched (init pid {})", id, pid);
        Ok(LaunchedProcess {
            pid,
            process: ProcessHandle::Adopted { pid },
            stdout,
            stderr,
        })
    }

    async fn signal(&self, id: &str, pid: u32, signal: Signal) -> Result<()> {
        self.cli.kill(id, pid, signal).await
    }

    async fn cleanup(&self, id: &str) -> Result<()> {
        self.cli.delete(id).await
    }
}

#[cfg(target_os = "linux")]
fn become_subreaper() -> Result<()> {
    // SAFETY: PR_SET_CHILD_SUBREAPER takes a plain integer flag.
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if ret != 0 {
        return Err(Error::io(
            "failed to become child subreaper",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn become_subreaper() -> Result<()> {
    Err(Error::Internal(
        "the create-start driver requires Linux child subreaping".to_string(),
    ))
}
