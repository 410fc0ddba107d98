//! Host language-runtime discovery.
//!
//! The bundle mounts a runtime home from the host into the container, so the
//! engine must find one before building. Sources are tried in order:
//!
//! 1. The override variable (`JAVA_HOME` by default), when set.
//! 2. Each hint, in the order given.
//! 3. Each configured fallback location. A fallback that is not itself a
//!    runtime home is scanned one level deep, newest name first.
//!
//! A source passes when `<home>/<binary>` exists and is executable. When none
//! pass, the error lists every source that was checked and why it failed.

use crate::config::EngineConfig;
use crate::constants::{DEFAULT_RUNTIME_BINARY, DEFAULT_RUNTIME_FALLBACKS, DEFAULT_RUNTIME_HOME_VAR};
use crate::error::{Diagnostic, Error, Result};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a runtime location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    /// The runtime-home override variable.
    Override,
    /// A caller-supplied hint.
    Hint,
    /// A configured fallback location.
    Fallback,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::Hint => write!(f, "hint"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// One source the locator checked, and why it did not qualify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedLocation {
    /// Human-readable source label (e.g. `$JAVA_HOME`, `hint`, `fallback`).
    pub source: String,
    /// Path checked, if the source produced one.
    pub path: Option<PathBuf>,
    /// Why it failed (`not set`, `not found`, ...).
    pub reason: String,
}

impl fmt::Display for CheckedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} {}: {}", self.source, path.display(), self.reason),
            None => write!(f, "{}: {}", self.source, self.reason),
        }
    }
}

/// A runtime installation on the host. Cached per task, never globally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLocation {
    /// Absolute runtime home directory.
    pub home: PathBuf,
    /// Absolute path of the runtime binary.
    pub binary: PathBuf,
    /// Which source produced it.
    pub source: LocationSource,
}

// =============================================================================
// Locator
// =============================================================================

/// Finds a runtime installation on the host.
#[derive(Debug, Clone)]
pub struct RuntimeLocator {
    home_var: String,
    binary: PathBuf,
    fallbacks: Vec<PathBuf>,
}

impl Default for RuntimeLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeLocator {
    /// Creates a locator with the default variable, binary and fallbacks.
    pub fn new() -> Self {
        Self {
            home_var: DEFAULT_RUNTIME_HOME_VAR.to_string(),
            binary: PathBuf::from(DEFAULT_RUNTIME_BINARY),
            fallbacks: DEFAULT_RUNTIME_FALLBACKS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Creates a locator from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            home_var: config.runtime_home_var.clone(),
            binary: config.runtime_binary.clone(),
            fallbacks: config.runtime_fallbacks.clone(),
        }
    }

    /// Sets the fallback locations.
    pub fn with_fallbacks(mut self, fallbacks: Vec<PathBuf>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Sets the override variable name.
    pub fn with_home_var(mut self, var: impl Into<String>) -> Self {
        self.home_var = var.into();
        self
    }

    /// Locates a runtime, reading the override variable from the process
    /// environment.
    pub fn locate(&self, hints: &[PathBuf]) -> Result<RuntimeLocation> {
        self.locate_with(std::env::var_os(&self.home_var), hints)
    }

    /// Locates a runtime with an explicitly supplied override value.
    pub fn locate_with(
        &self,
        override_home: Option<OsString>,
        hints: &[PathBuf],
    ) -> Result<RuntimeLocation> {
        let mut checked = Vec::new();
        let var_label = format!("${}", self.home_var);

        match override_home.filter(|v| !v.is_empty()) {
            None => checked.push(CheckedLocation {
                source: var_label,
                path: None,
                reason: "not set".to_string(),
            }),
            Some(value) => {
                let home = PathBuf::from(value);
                match self.check_home(&home) {
                    Ok(found) => return self.found(found, LocationSource::Override),
                    Err(reason) => checked.push(CheckedLocation {
                        source: var_label,
                        path: Some(home),
                        reason,
                    }),
                }
            }
        }

        for hint in hints {
            match self.check_home(hint) {
                Ok(found) => return self.found(found, LocationSource::Hint),
                Err(reason) => checked.push(CheckedLocation {
                    source: "hint".to_string(),
                    path: Some(hint.clone()),
                    reason,
                }),
            }
        }

        for fallback in &self.fallbacks {
            match self.check_home(fallback) {
                Ok(found) => return self.found(found, LocationSource::Fallback),
                Err(reason) => {
                    let is_dir = fallback.is_dir();
                    checked.push(CheckedLocation {
                        source: "fallback".to_string(),
                        path: Some(fallback.clone()),
                        reason,
                    });
                    if is_dir && let Some(found) = self.scan_installations(fallback, &mut checked) {
                        return self.found(found, LocationSource::Fallback);
                    }
                }
            }
        }

        let listing: Vec<String> = checked.iter().map(ToString::to_string).collect();
        Err(Error::RuntimeNotFound {
            diagnostic: Diagnostic::new(
                format!(
                    "a runtime home containing an executable {}",
                    self.binary.display()
                ),
                listing.join("; "),
                format!(
                    "install a Java runtime (e.g. a headless OpenJDK package) or point ${} \
                     or a runtime hint at its home directory",
                    self.home_var
                ),
            ),
            checked,
        })
    }

    /// Checks one installation directory per child, newest name first.
    fn scan_installations(
        &self,
        parent: &Path,
        checked: &mut Vec<CheckedLocation>,
    ) -> Option<(PathBuf, PathBuf)> {
        let mut children: Vec<PathBuf> = match fs::read_dir(parent) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(e) => {
                debug!("Cannot scan {}: {}", parent.display(), e);
                return None;
            }
        };
        children.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

        for child in children {
            match self.check_home(&child) {
                Ok(found) => return Some(found),
                Err(reason) => checked.push(CheckedLocation {
                    source: "fallback".to_string(),
                    path: Some(child),
                    reason,
                }),
            }
        }
        None
    }

    /// Returns `(home, binary)` or the reason the directory does not qualify.
    fn check_home(&self, home: &Path) -> std::result::Result<(PathBuf, PathBuf), String> {
        let meta = match fs::metadata(home) {
            Ok(meta) => meta,
            Err(_) => return Err("not found".to_string()),
        };
        if !meta.is_dir() {
            return Err("not a directory".to_string());
        }

        let binary = home.join(&self.binary);
        let bin_meta = match fs::metadata(&binary) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(format!("{} not found", self.binary.display())),
        };
        if !is_executable(&bin_meta) {
            return Err(format!("{} not executable", self.binary.display()));
        }

        let home = fs::canonicalize(home).map_err(|e| format!("unresolvable: {}", e))?;
        let binary = home.join(&self.binary);
        Ok((home, binary))
    }

    fn found(&self, (home, binary): (PathBuf, PathBuf), source: LocationSource) -> Result<RuntimeLocation> {
        info!("Using runtime at {} (from {})", home.display(), source);
        Ok(RuntimeLocation {
            home,
            binary,
            source,
        })
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &fs::Metadata) -> bool {
    meta.is_file()
}
