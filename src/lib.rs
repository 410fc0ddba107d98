//! # jarbox
//!
//! **Java Archive Task Engine on OCI Containers**
//!
//! This crate runs one Java archive per task inside an OCI container. The
//! container root is empty: the archive, a host Java runtime and a handful of
//! read-only system directories are bind-mounted in, and an external
//! runc-compatible runtime does the isolation. The embedding program (a
//! scheduler's task driver, a CLI) owns the task directory, the task id and
//! the output sinks.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             TaskHandle                              │
//! │          start(spec, sinks) │ wait() │ stop(timeout) │ inspect()    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │ ArchiveValidator │  │  RuntimeLocator  │  │  BundleBuilder   │   │
//! │  │ discover + check │  │ env → hints →    │  │ config.json with │   │
//! │  │ zip + manifest   │  │ fallback dirs    │  │ bind mounts only │   │
//! │  └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘   │
//! │           └──── ValidatedArtifact + RuntimeLocation ──┘             │
//! │                                 │                                   │
//! │  ┌──────────────────────────────┼──────────────────────────────┐    │
//! │  │                         Supervisor                          │    │
//! │  │  Created → Starting → Running → Exited | Killed             │    │
//! │  │                    └→ LaunchFailed                          │    │
//! │  └──────────────────────────────┬──────────────────────────────┘    │
//! │                                 │ stdout / stderr pipes             │
//! │  ┌──────────────────────────────┼──────────────────────────────┐    │
//! │  │                        LogStreamer                          │    │
//! │  │        one forwarder task per stream → caller sinks         │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                          Runtime Drivers                            │
//! │  ┌──────────────────────────┐  ┌────────────────────────────────┐   │
//! │  │        RunDriver         │  │       CreateStartDriver        │   │
//! │  │  run --bundle <dir> <id> │  │  create → start → delete       │   │
//! │  └──────────────────────────┘  └────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security Model
//!
//! - **Containment**: the archive must resolve (symlinks included) inside the
//!   task directory, see [`artifact::ArchiveValidator`].
//! - **Read-only host**: system directories and the runtime home are mounted
//!   `ro`; only the archive is the task's own content.
//! - **No privilege gain**: `noNewPrivileges` is always set, with fresh pid,
//!   ipc, uts and mount namespaces.
//! - **Bounded tmpfs**: `/dev` and `/dev/shm` carry explicit size limits.
//!
//! # Example
//!
//! ```rust,ignore
//! use jarbox::{EngineConfig, TaskHandle, TaskSinks, TaskSpec};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> jarbox::Result<()> {
//!     jarbox::logging::init_logging();
//!
//!     let task = TaskHandle::new("web-1", EngineConfig::default())?;
//!     let spec = TaskSpec::new("/var/lib/tasks/web-1");
//!     task.start(&spec, TaskSinks::open("out.log".as_ref(), "err.log".as_ref()).await?)
//!         .await?;
//!
//!     let result = task.wait().await?;
//!     println!("{} {:?}", result.state, result.exit_code);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod bundle;
pub mod config;
pub mod constants;
pub mod error;
pub mod locator;
pub mod logging;
pub mod runtime;
pub mod streamer;
pub mod supervisor;
pub mod task;

pub mod runtimes;

// Re-exports
pub use artifact::{ArchiveValidator, ArtifactWarning, ValidatedArtifact};
pub use bundle::{BundleBuilder, ContainerBundle};
pub use config::{
    Discovery, DriverKind, EngineConfig, ManifestPolicy, ResourceLimits, TaskConfig, TaskSpec,
};
pub use constants::*;
pub use error::{CorruptReason, Diagnostic, Error, ErrorKind, Result};
pub use locator::{CheckedLocation, LocationSource, RuntimeLocation, RuntimeLocator};
pub use runtime::{LaunchedProcess, ProcessHandle, RuntimeDriver, Signal};
pub use runtimes::{CreateStartDriver, RunDriver, RuntimeCli, driver_for};
pub use streamer::{ForwardReport, LogStreamer, StreamEnd, StreamKind, TaskSinks};
pub use supervisor::{Supervisor, TaskState, TerminalResult};
pub use task::TaskHandle;
