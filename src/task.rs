//! Task handle - the embedding program's view of one task.
//!
//! ```text
//! start(spec, sinks)
//!   ├─ ArchiveValidator::validate     task dir → ValidatedArtifact
//!   ├─ RuntimeLocator::locate         hints/env → RuntimeLocation
//!   ├─ BundleBuilder::build           → ContainerBundle (in memory)
//!   ├─ Supervisor::start              write bundle, launch, spawn waiter
//!   └─ LogStreamer::attach            pipes → sinks
//! wait()     terminal result, after both streams drained
//! stop(t)    SIGTERM, SIGKILL after t, returns once reaped
//! inspect()  current state, never blocks
//! ```
//!
//! A failure before launch (validation, runtime lookup, bundle build)
//! returns the error and leaves the task in `Created`; nothing was written
//! and the task may be started again.

use crate::artifact::{ArchiveValidator, ValidatedArtifact};
use crate::bundle::BundleBuilder;
use crate::config::{EngineConfig, TaskSpec};
use crate::constants::validate_task_id;
use crate::error::{Error, Result};
use crate::locator::{RuntimeLocation, RuntimeLocator};
use crate::runtime::RuntimeDriver;
use crate::runtimes::driver_for;
use crate::streamer::{BoxedSource, LogStreamer, TaskSinks};
use crate::supervisor::{Supervisor, TaskState, TerminalResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Handle to one supervised task.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    config: EngineConfig,
    supervisor: Supervisor,
    streamer: Mutex<Option<LogStreamer>>,
    starting: AtomicBool,
    artifact: OnceLock<ValidatedArtifact>,
    runtime: OnceLock<RuntimeLocation>,
}

impl TaskHandle {
    /// Creates a handle in `Created` using the driver selected by `config`.
    pub fn new(id: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let driver = driver_for(&config);
        Self::with_driver(id, config, driver)
    }

    /// Creates a handle with an explicit runtime driver.
    pub fn with_driver(
        id: impl Into<String>,
        config: EngineConfig,
        driver: Arc<dyn RuntimeDriver>,
    ) -> Result<Self> {
        let id = id.into();
        validate_task_id(&id).map_err(|reason| {
            Error::Config(format!("invalid task id '{}': {}", id, reason))
        })?;
        config.validate()?;

        let bundle_dir = config.bundle_root.join(&id);
        let supervisor = Supervisor::new(id.clone(), driver, bundle_dir, config.keep_bundles);
        Ok(Self {
            id,
            config,
            supervisor,
            streamer: Mutex::new(None),
            starting: AtomicBool::new(false),
            artifact: OnceLock::new(),
            runtime: OnceLock::new(),
        })
    }

    /// Task identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Where this task's bundle is written.
    pub fn bundle_dir(&self) -> PathBuf {
        self.supervisor.bundle_dir().to_path_buf()
    }

    /// Validates, builds and launches the task, then starts streaming its
    /// output into `sinks`.
    pub async fn start(&self, spec: &TaskSpec, sinks: TaskSinks) -> Result<()> {
        if self.starting.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState {
                id: self.id.clone(),
                state: self.inspect().to_string(),
                expected: TaskState::Created.to_string(),
            });
        }

        let bundle = match self.prepare(spec) {
            Ok(bundle) => bundle,
            Err(e) => {
                debug!(task = %self.id, "Pre-flight failed: {}", e);
                self.starting.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        // Held until the streamer is stored, so a waiter that sees the exit
        // cannot find the slot empty.
        let mut slot = self.streamer.lock().await;
        let outputs = self.supervisor.start(bundle).await?;
        let stdout: BoxedSource = match outputs.stdout {
            Some(pipe) => Box::new(pipe),
            None => Box::new(tokio::io::empty()),
        };
        let stderr: BoxedSource = match outputs.stderr {
            Some(pipe) => Box::new(pipe),
            None => Box::new(tokio::io::empty()),
        };
        *slot = Some(LogStreamer::attach(stdout, stderr, sinks.stdout, sinks.stderr));
        drop(slot);

        info!(task = %self.id, pid = ?self.pid(), "Task started");
        Ok(())
    }

    /// Runs the pre-flight steps. Nothing touches the filesystem.
    fn prepare(&self, spec: &TaskSpec) -> Result<crate::bundle::ContainerBundle> {
        let validator = ArchiveValidator::from_config(&self.config);
        let artifact = match &spec.archive {
            Some(archive) => validator.validate_explicit(&spec.task_dir, archive)?,
            None => validator.validate(&spec.task_dir)?,
        };
        for warning in &artifact.warnings {
            info!(task = %self.id, "Archive note: {}", warning);
        }

        let hints: Vec<PathBuf> = spec.runtime_hint.iter().cloned().collect();
        let runtime = RuntimeLocator::from_config(&self.config).locate(&hints)?;

        let bundle = BundleBuilder::from_config(&self.config).build(&artifact, &runtime, &spec.config)?;

        let _ = self.artifact.set(artifact);
        let _ = self.runtime.set(runtime);
        Ok(bundle)
    }

    /// Waits for the task to finish and both output streams to drain.
    ///
    /// May be called any number of times, concurrently; every call sees the
    /// same result.
    pub async fn wait(&self) -> Result<TerminalResult> {
        let mut result = self.supervisor.await_exit().await?;

        let mut streamer = self.streamer.lock().await;
        if let Some(streamer) = streamer.as_mut() {
            let (stdout, stderr) = streamer.drain().await;
            result.stdout = Some(stdout);
            result.stderr = Some(stderr);
        }
        Ok(result)
    }

    /// Stops the task with a graceful period of `timeout`.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        self.supervisor.stop(timeout).await
    }

    /// Stops the task with the configured graceful period.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop(self.config.stop_timeout()).await
    }

    /// Current lifecycle state. Never blocks on the process.
    pub fn inspect(&self) -> TaskState {
        self.supervisor.state()
    }

    /// Process identifier once running.
    pub fn pid(&self) -> Option<u32> {
        self.supervisor.lifecycle().pid
    }

    /// The validated archive, once pre-flight passed.
    pub fn artifact(&self) -> Option<&ValidatedArtifact> {
        self.artifact.get()
    }

    /// The runtime installation used, once located.
    pub fn runtime_location(&self) -> Option<&RuntimeLocation> {
        self.runtime.get()
    }
}
