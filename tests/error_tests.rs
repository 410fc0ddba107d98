//! Tests for error types.
//!
//! Validates display formatting, the expected/found/remedy diagnostics, and
//! error category mapping.

use jarbox::{CheckedLocation, CorruptReason, Diagnostic, Error, ErrorKind};
use std::error::Error as _;
use std::path::PathBuf;

fn diagnostic() -> Diagnostic {
    Diagnostic::new("one archive", "two archives", "remove one")
}

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_diagnostic_display() {
    assert_eq!(
        diagnostic().to_string(),
        "expected one archive, found two archives; remove one"
    );
}

#[test]
fn test_not_found_display() {
    let err = Error::NotFound {
        dir: PathBuf::from("/tasks/t1"),
        diagnostic: diagnostic(),
    };
    let msg = err.to_string();

    assert!(msg.contains("/tasks/t1"), "should include the task directory");
    assert!(msg.contains("remove one"), "should include the remedy");
}

#[test]
fn test_ambiguous_display_lists_candidates() {
    let err = Error::Ambiguous {
        dir: PathBuf::from("/tasks/t1"),
        candidates: vec!["a.jar".to_string(), "b.jar".to_string()],
        diagnostic: diagnostic(),
    };
    assert!(err.to_string().contains("a.jar, b.jar"));
}

#[test]
fn test_corrupt_display_names_reason() {
    let err = Error::Corrupt {
        path: PathBuf::from("/tasks/t1/app.jar"),
        reason: CorruptReason::Empty,
        diagnostic: diagnostic(),
    };
    let msg = err.to_string();
    assert!(msg.contains("app.jar"));
    assert!(msg.contains("empty"));
}

#[test]
fn test_security_violation_display_shows_target() {
    let err = Error::SecurityViolation {
        path: PathBuf::from("/tasks/t1/app.jar"),
        target: PathBuf::from("/etc/shadow"),
        diagnostic: diagnostic(),
    };
    assert!(err.to_string().contains("/etc/shadow"));
}

#[test]
fn test_runtime_not_found_counts_locations() {
    let err = Error::RuntimeNotFound {
        checked: vec![
            CheckedLocation {
                source: "$JAVA_HOME".to_string(),
                path: None,
                reason: "not set".to_string(),
            },
            CheckedLocation {
                source: "fallback".to_string(),
                path: Some(PathBuf::from("/usr/lib/jvm")),
                reason: "not found".to_string(),
            },
        ],
        diagnostic: diagnostic(),
    };
    assert!(err.to_string().contains("2 location(s)"));
}

#[test]
fn test_checked_location_display() {
    let with_path = CheckedLocation {
        source: "hint".to_string(),
        path: Some(PathBuf::from("/opt/jdk")),
        reason: "bin/java not found".to_string(),
    };
    let without_path = CheckedLocation {
        source: "$JAVA_HOME".to_string(),
        path: None,
        reason: "not set".to_string(),
    };

    assert_eq!(with_path.to_string(), "hint /opt/jdk: bin/java not found");
    assert_eq!(without_path.to_string(), "$JAVA_HOME: not set");
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState {
        id: "t1".to_string(),
        state: "running".to_string(),
        expected: "created".to_string(),
    };
    assert_eq!(err.to_string(), "task 't1' is in state 'running', expected 'created'");
}

#[test]
fn test_io_error_keeps_source() {
    let err = Error::io(
        "failed to write /b/config.json",
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    );

    assert!(err.to_string().starts_with("failed to write /b/config.json"));
    assert!(err.source().is_some());
    assert!(err.diagnostic().is_none());
}

// =============================================================================
// Category Tests
// =============================================================================

#[test]
fn test_kind_mapping() {
    let cases = [
        (
            Error::NotFound {
                dir: PathBuf::new(),
                diagnostic: diagnostic(),
            },
            ErrorKind::NotFound,
        ),
        (
            Error::BundleIncomplete {
                diagnostic: diagnostic(),
            },
            ErrorKind::BundleIncomplete,
        ),
        (
            Error::LaunchFailed {
                id: "t".to_string(),
                runtime: "runc".to_string(),
                diagnostic: diagnostic(),
            },
            ErrorKind::LaunchFailed,
        ),
        (Error::Config("x".to_string()), ErrorKind::Config),
        (Error::Internal("x".to_string()), ErrorKind::Internal),
    ];

    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "wrong kind for {}", err);
    }
}

#[test]
fn test_user_facing_errors_carry_diagnostics() {
    let err = Error::LaunchFailed {
        id: "t".to_string(),
        runtime: "runc".to_string(),
        diagnostic: diagnostic(),
    };
    let diag = err.diagnostic().unwrap();

    assert_eq!(diag.expected, "one archive");
    assert_eq!(diag.found, "two archives");
    assert_eq!(diag.remedy, "remove one");
}

#[test]
fn test_serde_json_error_converts() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
    let err: Error = parse.unwrap_err().into();
    assert_eq!(err.kind(), ErrorKind::Serialization);
}
