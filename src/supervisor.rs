//! Process supervision - one container process, from launch to reap.
//!
//! # State Machine
//!
//! ```text
//! Created ──start──► Starting ──launched──► Running ──exit──► Exited
//!                        │                     │
//!                        │                     └──signal────► Killed
//!                        └──launch error──► LaunchFailed
//! ```
//!
//! All states after `Running` are terminal. Transitions happen only through
//! `transition`, which publishes them on a `watch` channel, so `inspect`
//! never blocks and any number of callers can await the terminal result.
//!
//! Exactly one waiter task per process calls the OS wait; everyone else
//! observes the channel.

use crate::bundle::ContainerBundle;
use crate::constants::SIGNAL_EXIT_BASE;
use crate::error::{Error, Result};
use crate::runtime::{ProcessHandle, RuntimeDriver, Signal};
use crate::streamer::ForwardReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::watch;
use tracing::{debug, info, warn};

// =============================================================================
// Task State
// =============================================================================

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Handle exists; nothing launched yet.
    Created,
    /// Bundle written; runtime being invoked.
    Starting,
    /// Process launched and not yet reaped.
    Running,
    /// Process exited on its own (or its runtime did).
    Exited,
    /// Process terminated by a signal.
    Killed,
    /// The runtime could not be invoked.
    LaunchFailed,
}

impl TaskState {
    /// True for states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Killed | Self::LaunchFailed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting)
                | (Self::Starting, Self::Running)
                | (Self::Starting, Self::LaunchFailed)
                | (Self::Running, Self::Exited)
                | (Self::Running, Self::Killed)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Killed => write!(f, "killed"),
            Self::LaunchFailed => write!(f, "launch_failed"),
        }
    }
}

// =============================================================================
// Terminal Result
// =============================================================================

/// What a finished task reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalResult {
    /// Terminal state (`Exited`, `Killed` or `LaunchFailed`).
    pub state: TaskState,
    /// Exit status, when the process exited normally. For a runtime that
    /// reported a signal death as `128 + n`, the raw code is kept here.
    pub exit_code: Option<i32>,
    /// Terminating signal number for `Killed`.
    pub signal: Option<i32>,
    /// Launch or wait error text.
    pub error: Option<String>,
    /// When the process was launched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the terminal state was reached.
    pub finished_at: DateTime<Utc>,
    /// Final stdout relay report, once drained.
    pub stdout: Option<ForwardReport>,
    /// Final stderr relay report, once drained.
    pub stderr: Option<ForwardReport>,
}

impl TerminalResult {
    /// True for `Exited` with status 0.
    pub fn success(&self) -> bool {
        self.state == TaskState::Exited && self.exit_code == Some(0)
    }

    fn launch_failed(error: &Error) -> Self {
        Self {
            state: TaskState::LaunchFailed,
            exit_code: None,
            signal: None,
            error: Some(error.to_string()),
            started_at: None,
            finished_at: Utc::now(),
            stdout: None,
            stderr: None,
        }
    }
}

/// Snapshot of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    /// Current state.
    pub state: TaskState,
    /// Waited process id, from `Running` on.
    pub pid: Option<u32>,
    /// Launch time, from `Running` on.
    pub started_at: Option<DateTime<Utc>>,
    /// Set together with the terminal state.
    pub result: Option<TerminalResult>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: TaskState::Created,
            pid: None,
            started_at: None,
            result: None,
        }
    }
}

/// Applies `next` to the published lifecycle if the transition is legal.
///
/// Returns `InvalidState` (and changes nothing) otherwise.
fn transition(
    tx: &watch::Sender<Lifecycle>,
    id: &str,
    next: TaskState,
    update: impl FnOnce(&mut Lifecycle),
) -> Result<()> {
    let mut outcome = Ok(());
    tx.send_if_modified(|lc| {
        if !lc.state.can_transition_to(next) {
            outcome = Err(Error::InvalidState {
                id: id.to_string(),
                state: lc.state.to_string(),
                expected: expected_before(next).to_string(),
            });
            return false;
        }
        debug!("Task {}: {} -> {}", id, lc.state, next);
        lc.state = next;
        update(lc);
        true
    });
    outcome
}

fn expected_before(next: TaskState) -> &'static str {
    match next {
        TaskState::Created => "none",
        TaskState::Starting => "created",
        TaskState::Running | TaskState::LaunchFailed => "starting",
        TaskState::Exited | TaskState::Killed => "running",
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Container pipes handed to the log streamer.
#[derive(Debug)]
pub struct ProcessOutputs {
    /// Container stdout, when the driver captured it.
    pub stdout: Option<ChildStdout>,
    /// Container stderr, when the driver captured it.
    pub stderr: Option<ChildStderr>,
}

/// Launches, signals and reaps one container process.
pub struct Supervisor {
    id: String,
    driver: Arc<dyn RuntimeDriver>,
    bundle_dir: PathBuf,
    keep_bundle: bool,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    stop_requested: Arc<AtomicBool>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("bundle_dir", &self.bundle_dir)
            .field("state", &self.state())
            .finish()
    }
}

impl Supervisor {
    /// Creates a supervisor in `Created` for task `id`.
    ///
    /// The bundle is written to `bundle_dir` on start and removed after the
    /// process is reaped unless `keep_bundle` is set.
    pub fn new(
        id: impl Into<String>,
        driver: Arc<dyn RuntimeDriver>,
        bundle_dir: impl Into<PathBuf>,
        keep_bundle: bool,
    ) -> Self {
        let (tx, _rx) = watch::channel(Lifecycle::new());
        Self {
            id: id.into(),
            driver,
            bundle_dir: bundle_dir.into(),
            keep_bundle,
            lifecycle: Arc::new(tx),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Task identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Where the bundle is written.
    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Current state. Never blocks on the process.
    pub fn state(&self) -> TaskState {
        self.lifecycle.borrow().state
    }

    /// Current snapshot.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.borrow().clone()
    }

    /// A receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// Writes the bundle and launches it.
    ///
    /// On success the task is `Running` and a waiter task owns the process.
    /// A launch error leaves the task in `LaunchFailed` and is returned.
    pub async fn start(&self, bundle: ContainerBundle) -> Result<ProcessOutputs> {
        transition(&self.lifecycle, &self.id, TaskState::Starting, |_| {})?;

        if let Err(e) = bundle.write_to(&self.bundle_dir) {
            self.fail_launch(&e);
            return Err(e);
        }
        drop(bundle);

        let launched = match self.driver.launch(&self.id, &self.bundle_dir).await {
            Ok(launched) => launched,
            Err(e) => {
                warn!(task = %self.id, "Launch failed: {}", e);
                self.fail_launch(&e);
                remove_bundle(&self.bundle_dir, self.keep_bundle).await;
                return Err(e);
            }
        };

        let started_at = Utc::now();
        let pid = launched.pid;
        transition(&self.lifecycle, &self.id, TaskState::Running, |lc| {
            lc.pid = Some(pid);
            lc.started_at = Some(started_at);
        })?;
        info!(task = %self.id, pid, "Task running");

        tokio::spawn(reap(
            self.id.clone(),
            launched.process,
            Arc::clone(&self.driver),
            self.bundle_dir.clone(),
            self.keep_bundle,
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.stop_requested),
        ));

        Ok(ProcessOutputs {
            stdout: launched.stdout,
            stderr: launched.stderr,
        })
    }

    fn fail_launch(&self, error: &Error) {
        let result = TerminalResult::launch_failed(error);
        if let Err(e) = transition(&self.lifecycle, &self.id, TaskState::LaunchFailed, |lc| {
            lc.result = Some(result);
        }) {
            warn!("Task {}: {}", self.id, e);
        }
    }

    /// Waits for the terminal result.
    ///
    /// Fails with `InvalidState` if the task was never started.
    pub async fn await_exit(&self) -> Result<TerminalResult> {
        let mut rx = self.lifecycle.subscribe();
        let state = rx.borrow().state;
        if state == TaskState::Created {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                state: state.to_string(),
                expected: "started".to_string(),
            });
        }

        let result = rx
            .wait_for(|lc| lc.result.is_some())
            .await
            .map_err(|_| Error::Internal(format!("lifecycle of task {} closed", self.id)))?
            .result
            .clone();
        result.ok_or_else(|| Error::Internal(format!("task {} has no result", self.id)))
    }

    /// Stops the process: SIGTERM, then SIGKILL after `timeout`.
    ///
    /// Returns once the process has been reaped. Stopping a task that never
    /// started or has already finished does nothing.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.lifecycle.subscribe();
        let snapshot = rx
            .wait_for(|lc| lc.state != TaskState::Starting)
            .await
            .map_err(|_| Error::Internal(format!("lifecycle of task {} closed", self.id)))?
            .clone();

        if snapshot.state != TaskState::Running {
            debug!("Task {} is {}; nothing to stop", self.id, snapshot.state);
            return Ok(());
        }
        let pid = snapshot
            .pid
            .ok_or_else(|| Error::Internal(format!("running task {} has no pid", self.id)))?;

        self.stop_requested.store(true, Ordering::SeqCst);
        info!(task = %self.id, pid, "Stopping with {}", Signal::Term);
        if let Err(e) = self.driver.signal(&self.id, pid, Signal::Term).await {
            warn!("Failed to send {} to task {}: {}", Signal::Term, self.id, e);
        }

        let exited = tokio::time::timeout(timeout, rx.wait_for(|lc| lc.state.is_terminal()))
            .await
            .is_ok();
        if exited {
            return Ok(());
        }

        warn!(
            "Task {} did not exit within {:?}, sending {}",
            self.id,
            timeout,
            Signal::Kill
        );
        self.driver.signal(&self.id, pid, Signal::Kill).await?;
        rx.wait_for(|lc| lc.state.is_terminal())
            .await
            .map_err(|_| Error::Internal(format!("lifecycle of task {} closed", self.id)))?;
        Ok(())
    }
}

// =============================================================================
// Waiter
// =============================================================================

async fn reap(
    id: String,
    process: ProcessHandle,
    driver: Arc<dyn RuntimeDriver>,
    bundle_dir: PathBuf,
    keep_bundle: bool,
    lifecycle: Arc<watch::Sender<Lifecycle>>,
    stop_requested: Arc<AtomicBool>,
) {
    let status = process.wait().await;
    let finished_at = Utc::now();
    let outcome = classify(&status, stop_requested.load(Ordering::SeqCst));

    if let Err(e) = driver.cleanup(&id).await {
        warn!("Runtime cleanup for task {} failed: {}", id, e);
    }
    remove_bundle(&bundle_dir, keep_bundle).await;

    match outcome.state {
        TaskState::Killed => info!(task = %id, signal = ?outcome.signal, "Task killed"),
        _ => info!(task = %id, exit_code = ?outcome.exit_code, "Task exited"),
    }

    let started_at = lifecycle.borrow().started_at;
    let result = TerminalResult {
        state: outcome.state,
        exit_code: outcome.exit_code,
        signal: outcome.signal,
        error: outcome.error,
        started_at,
        finished_at,
        stdout: None,
        stderr: None,
    };
    if let Err(e) = transition(&lifecycle, &id, result.state, |lc| {
        lc.result = Some(result);
    }) {
        warn!("Task {}: {}", id, e);
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Outcome {
    state: TaskState,
    exit_code: Option<i32>,
    signal: Option<i32>,
    error: Option<String>,
}

/// Maps an OS wait status to a terminal outcome.
///
/// A runtime that relays a signal death reports `128 + n`; that is decoded
/// as `Killed` only when a stop was requested, since a program may exit
/// with such a code on its own.
fn classify(status: &std::io::Result<ExitStatus>, stop_requested: bool) -> Outcome {
    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return Outcome {
                state: TaskState::Exited,
                exit_code: None,
                signal: None,
                error: Some(format!("failed to wait for process: {}", e)),
            };
        }
    };

    if let Some(signal) = terminating_signal(status) {
        return Outcome {
            state: TaskState::Killed,
            exit_code: None,
            signal: Some(signal),
            error: None,
        };
    }

    let code = status.code();
    if stop_requested
        && let Some(code) = code
        && code > SIGNAL_EXIT_BASE
        && code < SIGNAL_EXIT_BASE + 65
    {
        return Outcome {
            state: TaskState::Killed,
            exit_code: Some(code),
            signal: Some(code - SIGNAL_EXIT_BASE),
            error: None,
        };
    }

    Outcome {
        state: TaskState::Exited,
        exit_code: code,
        signal: None,
        error: None,
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn remove_bundle(dir: &Path, keep: bool) {
    if keep {
        debug!("Keeping bundle {}", dir.display());
        return;
    }
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed bundle {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove bundle {}: {}", dir.display(), e),
    }
}
