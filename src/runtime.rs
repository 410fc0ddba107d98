//! Runtime driver trait - the lifecycle protocol of the external container
//! runtime.
//!
//! OCI runtimes come in two CLI shapes:
//!
//! ```text
//! combined:  run --bundle <dir> <id>                       (one waitable process)
//! separate:  create --bundle <dir> --pid-file <f> <id> → start <id> → delete <id>
//! ```
//!
//! [`RuntimeDriver`] hides the difference from the supervisor. A driver
//! launches the container and hands back a [`LaunchedProcess`]: something the
//! supervisor can wait on with standard OS process-wait semantics, plus the
//! container's stdout/stderr pipes.
//!
//! Implementations live in [`crate::runtimes`].

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::{Child, ChildStderr, ChildStdout};

// =============================================================================
// Signals
// =============================================================================

/// Signal to send to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM (graceful shutdown).
    Term,
    /// SIGKILL (force kill).
    Kill,
}

impl Signal {
    /// Returns the signal number.
    #[cfg(unix)]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }

    #[cfg(not(unix))]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => 15,
            Self::Kill => 9,
        }
    }

    /// Name as accepted by `runc kill` (without the `SIG` prefix).
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SIG{}", self.short_name())
    }
}

/// Sends `signal` directly to `pid`. A process that is already gone is not
/// an error.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Internal(format!("pid {} out of range", pid)))?;
    // SAFETY: kill() has no memory-safety preconditions; pid is a process we
    // launched or adopted.
    let ret = unsafe { libc::kill(pid, signal.as_i32()) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(Error::io(format!("failed to send {} to pid {}", signal, pid), err));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    Err(Error::Internal(format!(
        "cannot send {} to pid {}: signals require a unix host",
        signal, pid
    )))
}

// =============================================================================
// Launched Process
// =============================================================================

/// The OS process the supervisor waits on.
#[derive(Debug)]
pub enum ProcessHandle {
    /// A direct child (the runtime's `run` process).
    Child(Child),
    /// A process re-parented to us as child subreaper (the container init
    /// after `create` exited).
    Adopted { pid: u32 },
}

impl ProcessHandle {
    /// OS process identifier, if still known.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Child(child) => child.id(),
            Self::Adopted { pid } => Some(*pid),
        }
    }

    /// Waits for the process to exit and reaps it.
    pub async fn wait(self) -> std::io::Result<ExitStatus> {
        match self {
            Self::Child(mut child) => child.wait().await,
            Self::Adopted { pid } => wait_adopted(pid).await,
        }
    }
}

#[cfg(unix)]
async fn wait_adopted(pid: u32) -> std::io::Result<ExitStatus> {
    use std::os::unix::process::ExitStatusExt;

    let pid = libc::pid_t::try_from(pid).map_err(std::io::Error::other)?;
    tokio::task::spawn_blocking(move || {
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: waitpid writes only to `status`, which outlives the call.
            let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
            if ret == pid {
                return Ok(ExitStatus::from_raw(status));
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(not(unix))]
async fn wait_adopted(pid: u32) -> std::io::Result<ExitStatus> {
    Err(std::io::Error::other(format!(
        "cannot wait for adopted pid {}: requires a unix host",
        pid
    )))
}

/// Result of a successful launch.
#[derive(Debug)]
pub struct LaunchedProcess {
    /// Process identifier recorded on the task.
    pub pid: u32,
    /// Handle the lifecycle waiter consumes.
    pub process: ProcessHandle,
    /// Container stdout pipe.
    pub stdout: Option<ChildStdout>,
    /// Container stderr pipe.
    pub stderr: Option<ChildStderr>,
}

// =============================================================================
// Runtime Driver Trait
// =============================================================================

/// Lifecycle protocol of an external OCI runtime.
///
/// # Lifecycle
///
/// ```text
/// launch(id, bundle) → [signal(id, pid, sig)...] → (process exits) → cleanup(id)
/// ```
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Returns the driver name.
    fn name(&self) -> &str;

    /// Starts the container described by `bundle/config.json`.
    ///
    /// Fails with [`Error::LaunchFailed`] when the runtime cannot be invoked
    /// or refuses the bundle. Never retried by the engine.
    async fn launch(&self, id: &str, bundle: &Path) -> Result<LaunchedProcess>;

    /// Delivers `signal` to the container whose waited process is `pid`.
    async fn signal(&self, _id: &str, pid: u32, signal: Signal) -> Result<()> {
        send_signal(pid, signal)
    }

    /// Releases runtime state once the waited process has been reaped.
    async fn cleanup(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}
