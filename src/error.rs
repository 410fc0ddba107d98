//! Error types for the task-execution engine.
//!
//! Every error a task owner can act on carries a [`Diagnostic`] with three
//! mandatory fields: what was expected, what was found, and a remedy. A
//! headless driver has no other way to explain itself, so these are part of
//! the variant rather than optional context.
//!
//! A container that exits nonzero is *not* an error: it is reported through
//! [`TerminalResult`](crate::supervisor::TerminalResult) with the exit code
//! verbatim.

use crate::locator::CheckedLocation;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Diagnostic
// =============================================================================

/// Expected / found / remedy triple attached to every user-facing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What the engine was looking for.
    pub expected: String,
    /// What it actually saw.
    pub found: String,
    /// What the task owner should do about it.
    pub remedy: String,
}

impl Diagnostic {
    /// Creates a diagnostic from its three parts.
    pub fn new(
        expected: impl Into<String>,
        found: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
            remedy: remedy.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {}, found {}; {}",
            self.expected, self.found, self.remedy
        )
    }
}

/// Why an archive was judged corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Zero-length file.
    Empty,
    /// Truncated file or content that is not a ZIP container at all.
    InvalidStructure,
    /// Well-formed container without `META-INF/MANIFEST.MF`.
    ///
    /// Only raised when the manifest policy is strict; otherwise recorded as
    /// a warning note on the validated artifact.
    ManifestMissing,
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::InvalidStructure => write!(f, "truncated or invalid archive structure"),
            Self::ManifestMissing => {
                write!(f, "valid archive structure but no manifest entry")
            }
        }
    }
}

/// Flat error category, for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Ambiguous,
    Corrupt,
    SecurityViolation,
    RuntimeNotFound,
    BundleIncomplete,
    LaunchFailed,
    InvalidState,
    Io,
    Config,
    Serialization,
    Internal,
}

// =============================================================================
// Error
// =============================================================================

/// Errors that can occur while preparing or supervising a task.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Artifact Validation Errors
    // =========================================================================
    /// No archive matched in the task directory.
    #[error("no archive found in {}: {diagnostic}", dir.display())]
    NotFound { dir: PathBuf, diagnostic: Diagnostic },

    /// More than one archive matched.
    #[error("ambiguous archives in {} [{}]: {diagnostic}", dir.display(), candidates.join(", "))]
    Ambiguous {
        dir: PathBuf,
        candidates: Vec<String>,
        diagnostic: Diagnostic,
    },

    /// The single candidate is not a usable archive.
    #[error("corrupt archive {} ({reason}): {diagnostic}", path.display())]
    Corrupt {
        path: PathBuf,
        reason: CorruptReason,
        diagnostic: Diagnostic,
    },

    /// The candidate resolves outside the task directory.
    #[error("archive {} resolves to {} outside the task directory: {diagnostic}", path.display(), target.display())]
    SecurityViolation {
        path: PathBuf,
        target: PathBuf,
        diagnostic: Diagnostic,
    },

    // =========================================================================
    // Runtime Location Errors
    // =========================================================================
    /// No usable language runtime on the host.
    #[error("no runtime found ({} location(s) checked): {diagnostic}", checked.len())]
    RuntimeNotFound {
        checked: Vec<CheckedLocation>,
        diagnostic: Diagnostic,
    },

    // =========================================================================
    // Bundle Errors
    // =========================================================================
    /// The bundle cannot be completed from the host as it is.
    #[error("bundle incomplete: {diagnostic}")]
    BundleIncomplete { diagnostic: Diagnostic },

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// The external runtime could not be invoked.
    #[error("failed to launch task '{id}' with runtime '{runtime}': {diagnostic}")]
    LaunchFailed {
        id: String,
        runtime: String,
        diagnostic: Diagnostic,
    },

    /// Operation not valid in the task's current lifecycle state.
    #[error("task '{id}' is in state '{state}', expected '{expected}'")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    // =========================================================================
    // I/O, Configuration, Internal
    // =========================================================================
    /// OS-level failure, wrapped with what the engine was doing.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Bundle or config (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wraps an I/O error with a path-bearing context.
    pub(crate) fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {} {}", action, path.display()), source)
    }

    /// Returns the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Ambiguous { .. } => ErrorKind::Ambiguous,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::SecurityViolation { .. } => ErrorKind::SecurityViolation,
            Self::RuntimeNotFound { .. } => ErrorKind::RuntimeNotFound,
            Self::BundleIncomplete { .. } => ErrorKind::BundleIncomplete,
            Self::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Io { .. } => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the expected / found / remedy triple for user-facing errors.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Self::NotFound { diagnostic, .. }
            | Self::Ambiguous { diagnostic, .. }
            | Self::Corrupt { diagnostic, .. }
            | Self::SecurityViolation { diagnostic, .. }
            | Self::RuntimeNotFound { diagnostic, .. }
            | Self::BundleIncomplete { diagnostic }
            | Self::LaunchFailed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
