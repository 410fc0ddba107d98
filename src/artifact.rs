//! Archive discovery and structural validation.
//!
//! Turns whatever the orchestrator downloaded into a task directory into one
//! confirmed, runnable archive. Nothing is launched until this succeeds.
//!
//! ## Checks, in order
//!
//! | Step | Failure |
//! |------|---------|
//! | Find files matching the extension (case-insensitive) | `NotFound` / `Ambiguous` |
//! | Resolve symlinks, require the target inside the task directory | `SecurityViolation` |
//! | Non-empty regular file | `Corrupt(Empty)` |
//! | ZIP central directory parses | `Corrupt(InvalidStructure)` |
//! | `META-INF/MANIFEST.MF` present | warning, or `Corrupt(ManifestMissing)` when strict |
//!
//! Discovery is top-level only unless [`Discovery::Recursive`] is configured.

use crate::config::{Discovery, EngineConfig, ManifestPolicy};
use crate::constants::{
    DEFAULT_ARCHIVE_EXTENSION, MAIN_CLASS_ATTRIBUTE, MANIFEST_ENTRY, MAX_MANIFEST_SIZE,
};
use crate::error::{CorruptReason, Diagnostic, Error, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Non-fatal findings recorded on a validated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactWarning {
    /// Well-formed archive without a manifest entry.
    ManifestMissing,
    /// Manifest present but declares no entry point.
    MainClassMissing,
}

impl fmt::Display for ArtifactWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestMissing => write!(
                f,
                "valid archive structure but no {} entry; the archive may not be runnable",
                MANIFEST_ENTRY
            ),
            Self::MainClassMissing => write!(
                f,
                "manifest has no {} attribute; `java -jar` will refuse to start it",
                MAIN_CLASS_ATTRIBUTE
            ),
        }
    }
}

/// One archive confirmed runnable. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedArtifact {
    /// Absolute, symlink-resolved path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Whether the manifest entry exists.
    pub manifest_present: bool,
    /// Entry point declared by the manifest.
    pub main_class: Option<String>,
    /// Warnings recorded during validation.
    pub warnings: Vec<ArtifactWarning>,
}

// =============================================================================
// Validator
// =============================================================================

/// Finds and checks the archive in a task directory.
#[derive(Debug, Clone)]
pub struct ArchiveValidator {
    extension: String,
    discovery: Discovery,
    manifest_policy: ManifestPolicy,
}

impl Default for ArchiveValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveValidator {
    /// Creates a validator for `*.jar`, top-level discovery, lenient manifest.
    pub fn new() -> Self {
        Self {
            extension: DEFAULT_ARCHIVE_EXTENSION.to_string(),
            discovery: Discovery::default(),
            manifest_policy: ManifestPolicy::default(),
        }
    }

    /// Creates a validator from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new()
            .with_extension(&config.archive_extension)
            .with_discovery(config.discovery)
            .with_manifest_policy(config.manifest_policy)
    }

    /// Sets the archive extension (a leading dot is ignored).
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Sets the discovery mode.
    pub fn with_discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Sets the manifest policy.
    pub fn with_manifest_policy(mut self, policy: ManifestPolicy) -> Self {
        self.manifest_policy = policy;
        self
    }

    /// Discovers exactly one archive in `task_dir` and validates it.
    pub fn validate(&self, task_dir: &Path) -> Result<ValidatedArtifact> {
        let root = self.canonical_root(task_dir)?;
        let mut candidates = self.discover(&root)?;

        match candidates.len() {
            0 => Err(Error::NotFound {
                dir: task_dir.to_path_buf(),
                diagnostic: Diagnostic::new(
                    self.expectation(),
                    "no matching files",
                    "check that the artifact was downloaded into the task directory, \
                     or name the archive explicitly",
                ),
            }),
            1 => {
                let (_, path) = candidates.remove(0);
                self.check(&root, &path)
            }
            n => {
                let names: Vec<String> = candidates.into_iter().map(|(name, _)| name).collect();
                Err(Error::Ambiguous {
                    dir: task_dir.to_path_buf(),
                    diagnostic: Diagnostic::new(
                        self.expectation(),
                        format!("{} candidates: {}", n, names.join(", ")),
                        "remove the extra archives or name the one to run explicitly",
                    ),
                    candidates: names,
                })
            }
        }
    }

    /// Validates an explicitly named archive, skipping discovery.
    ///
    /// Relative paths are taken from `task_dir`. Containment and structural
    /// checks are the same as for a discovered archive.
    pub fn validate_explicit(&self, task_dir: &Path, archive: &Path) -> Result<ValidatedArtifact> {
        let root = self.canonical_root(task_dir)?;
        let path = if archive.is_absolute() {
            archive.to_path_buf()
        } else {
            root.join(archive)
        };

        if fs::symlink_metadata(&path).is_err() {
            return Err(Error::NotFound {
                dir: task_dir.to_path_buf(),
                diagnostic: Diagnostic::new(
                    format!("archive {}", archive.display()),
                    "no such file",
                    "fix the configured archive path or let the engine discover it",
                ),
            });
        }

        self.check(&root, &path)
    }

    /// Lists candidates as `(relative name, path)`, sorted by name.
    fn discover(&self, root: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(self.discovery.max_depth())
            .follow_links(false);

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                match e.into_io_error() {
                    Some(io) => Error::io_at("scan", &path, io),
                    None => Error::Internal(format!("walk loop at {}", path.display())),
                }
            })?;

            let file_type = entry.file_type();
            if file_type.is_dir() || !self.matches_extension(entry.path()) {
                continue;
            }
            // A link to a directory named like an archive is not a candidate;
            // dangling links are kept and reported when resolved.
            if file_type.is_symlink()
                && let Ok(meta) = fs::metadata(entry.path())
                && meta.is_dir()
            {
                continue;
            }

            let name = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            debug!("Archive candidate: {}", name);
            found.push((name, entry.into_path()));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    /// Runs containment and structural checks on one candidate.
    fn check(&self, root: &Path, path: &Path) -> Result<ValidatedArtifact> {
        let target = fs::canonicalize(path).map_err(|e| Error::NotFound {
            dir: root.to_path_buf(),
            diagnostic: Diagnostic::new(
                format!("readable archive at {}", path.display()),
                format!("unresolvable path ({})", e),
                "replace the dangling link with the actual archive",
            ),
        })?;

        // SECURITY: the archive is bind-mounted into the container, so a link
        // must not expose anything outside the task directory.
        if !target.starts_with(root) {
            return Err(Error::SecurityViolation {
                path: path.to_path_buf(),
                diagnostic: Diagnostic::new(
                    format!("archive inside {}", root.display()),
                    format!("link resolving to {}", target.display()),
                    "copy the archive into the task directory instead of linking to it",
                ),
                target,
            });
        }

        let meta = fs::metadata(&target).map_err(|e| Error::io_at("stat", &target, e))?;
        if !meta.is_file() {
            return Err(corrupt(
                &target,
                CorruptReason::InvalidStructure,
                "not a regular file".to_string(),
            ));
        }
        if meta.len() == 0 {
            return Err(corrupt(&target, CorruptReason::Empty, "zero-length file".to_string()));
        }

        let file = File::open(&target).map_err(|e| Error::io_at("open", &target, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            corrupt(&target, CorruptReason::InvalidStructure, e.to_string())
        })?;

        let manifest_name = archive
            .file_names()
            .find(|n| n.eq_ignore_ascii_case(MANIFEST_ENTRY))
            .map(str::to_string);

        let mut warnings = Vec::new();
        let main_class = match manifest_name {
            Some(name) => {
                let manifest = read_manifest(&mut archive, &name)
                    .map_err(|reason| corrupt(&target, CorruptReason::InvalidStructure, reason))?;
                let main_class = parse_main_class(&manifest);
                if main_class.is_none() {
                    warn!(
                        "{}: {}",
                        target.display(),
                        ArtifactWarning::MainClassMissing
                    );
                    warnings.push(ArtifactWarning::MainClassMissing);
                }
                main_class
            }
            None if self.manifest_policy == ManifestPolicy::Require => {
                return Err(corrupt(
                    &target,
                    CorruptReason::ManifestMissing,
                    format!("ZIP container with {} entries and no manifest", archive.len()),
                ));
            }
            None => {
                warn!("{}: {}", target.display(), ArtifactWarning::ManifestMissing);
                warnings.push(ArtifactWarning::ManifestMissing);
                None
            }
        };

        info!(
            "Validated archive {} ({} bytes, {} entries)",
            target.display(),
            meta.len(),
            archive.len()
        );

        Ok(ValidatedArtifact {
            path: target,
            size: meta.len(),
            manifest_present: !warnings.contains(&ArtifactWarning::ManifestMissing),
            main_class,
            warnings,
        })
    }

    fn canonical_root(&self, task_dir: &Path) -> Result<PathBuf> {
        fs::canonicalize(task_dir).map_err(|e| Error::NotFound {
            dir: task_dir.to_path_buf(),
            diagnostic: Diagnostic::new(
                "an existing task directory",
                format!("unreadable directory ({})", e),
                "check that the orchestrator created the task directory before starting the task",
            ),
        })
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension))
    }

    fn expectation(&self) -> String {
        match self.discovery {
            Discovery::TopLevel => {
                format!("exactly one '*.{}' file at the top level", self.extension)
            }
            Discovery::Recursive { .. } => format!(
                "exactly one '*.{}' file within {} level(s)",
                self.extension,
                self.discovery.max_depth()
            ),
        }
    }
}

// =============================================================================
// Manifest Helpers
// =============================================================================

fn corrupt(path: &Path, reason: CorruptReason, found: String) -> Error {
    let (expected, remedy) = match reason {
        CorruptReason::Empty => (
            "a non-empty archive",
            "re-download the artifact; the transfer most likely failed",
        ),
        CorruptReason::InvalidStructure => (
            "a ZIP-framed archive",
            "re-download the artifact; if it is an HTML error page, check the source URL and credentials",
        ),
        CorruptReason::ManifestMissing => (
            "an archive containing META-INF/MANIFEST.MF",
            "rebuild the archive with a manifest or set manifest_policy to \"warn\"",
        ),
    };
    Error::Corrupt {
        path: path.to_path_buf(),
        reason,
        diagnostic: Diagnostic::new(expected, found, remedy),
    }
}

fn read_manifest<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> std::result::Result<String, String> {
    let entry = archive.by_name(name).map_err(|e| e.to_string())?;
    if entry.size() > MAX_MANIFEST_SIZE {
        return Err(format!(
            "manifest of {} bytes exceeds {} byte limit",
            entry.size(),
            MAX_MANIFEST_SIZE
        ));
    }
    let mut raw = Vec::new();
    entry
        .take(MAX_MANIFEST_SIZE)
        .read_to_end(&mut raw)
        .map_err(|e| format!("unreadable manifest: {}", e))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Extracts `Main-Class` from the manifest's main section.
///
/// Lines starting with a single space continue the previous header; the main
/// section ends at the first blank line.
pub fn parse_main_class(manifest: &str) -> Option<String> {
    let mut headers: Vec<String> = Vec::new();
    for line in manifest.lines() {
        if line.is_empty() {
            break;
        }
        match line.strip_prefix(' ') {
            Some(rest) => {
                if let Some(last) = headers.last_mut() {
                    last.push_str(rest);
                }
            }
            None => headers.push(line.to_string()),
        }
    }

    headers.iter().find_map(|header| {
        let (key, value) = header.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case(MAIN_CLASS_ATTRIBUTE) {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_main_class() {
        let manifest = "Manifest-Version: 1.0\r\nMain-Class: com.example.App\r\n\r\n";
        assert_eq!(parse_main_class(manifest).as_deref(), Some("com.example.App"));
    }

    #[test]
    fn test_parse_main_class_continuation() {
        let manifest = "Manifest-Version: 1.0\nMain-Class: com.example.very.long.packa\n ge.App\n";
        assert_eq!(
            parse_main_class(manifest).as_deref(),
            Some("com.example.very.long.package.App")
        );
    }

    #[test]
    fn test_parse_main_class_ignores_entry_sections() {
        let manifest = "Manifest-Version: 1.0\n\nName: foo/\nMain-Class: not.This\n";
        assert_eq!(parse_main_class(manifest), None);
    }

    #[test]
    fn test_parse_main_class_empty_value() {
        assert_eq!(parse_main_class("Main-Class:   \n"), None);
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        let validator = ArchiveValidator::new().with_extension(".JAR");
        assert!(validator.matches_extension(Path::new("/t/App.Jar")));
        assert!(validator.matches_extension(Path::new("/t/app.jar")));
        assert!(!validator.matches_extension(Path::new("/t/notajar.txt")));
        assert!(!validator.matches_extension(Path::new("/t/jar")));
    }
}
