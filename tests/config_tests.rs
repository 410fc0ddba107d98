//! Tests for engine and task configuration loading.

use jarbox::{Discovery, DriverKind, EngineConfig, ManifestPolicy, TaskConfig, constants};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// EngineConfig Tests
// =============================================================================

#[test]
fn test_engine_defaults_match_constants() {
    let config = EngineConfig::default();

    assert_eq!(config.runtime_executable, PathBuf::from(constants::DEFAULT_RUNTIME_EXECUTABLE));
    assert_eq!(config.driver, DriverKind::Run);
    assert_eq!(config.discovery, Discovery::TopLevel);
    assert_eq!(config.manifest_policy, ManifestPolicy::Warn);
    assert_eq!(config.runtime_home_var, "JAVA_HOME");
    assert_eq!(config.stop_timeout(), constants::DEFAULT_STOP_TIMEOUT);
    assert!(!config.keep_bundles);
    assert!(config.optional_system_mounts.contains(&PathBuf::from("/lib64")));
    assert!(config.validate().is_ok());
}

#[test]
fn test_engine_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("engine.json");
    std::fs::write(
        &path,
        r#"{
            "runtime_executable": "/usr/bin/crun",
            "driver": "create_start",
            "discovery": { "mode": "recursive", "max_depth": 2 },
            "manifest_policy": "require",
            "system_mounts": ["/usr", "/lib64"],
            "stop_timeout_secs": 30
        }"#,
    )
    .unwrap();

    let config = EngineConfig::from_json_file(&path).unwrap();

    assert_eq!(config.runtime_executable, PathBuf::from("/usr/bin/crun"));
    assert_eq!(config.driver, DriverKind::CreateStart);
    assert_eq!(config.discovery, Discovery::Recursive { max_depth: 2 });
    assert_eq!(config.manifest_policy, ManifestPolicy::Require);
    assert_eq!(config.system_mounts, [PathBuf::from("/usr"), PathBuf::from("/lib64")]);
    assert_eq!(config.stop_timeout(), Duration::from_secs(30));
    assert_eq!(config.archive_extension, "jar");
}

#[test]
fn test_engine_config_missing_file() {
    let dir = TempDir::new().unwrap();
    assert!(EngineConfig::from_json_file(&dir.path().join("absent.json")).is_err());
}

#[test]
fn test_engine_config_rejects_relative_system_mount() {
    let config = EngineConfig::default().with_system_mounts(vec![PathBuf::from("usr/lib")]);
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_rejects_relative_optional_mount() {
    let config = EngineConfig::default().with_optional_system_mounts(vec![PathBuf::from("lib64")]);
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_rejects_unknown_driver() {
    assert!(EngineConfig::from_json_str(r#"{ "driver": "exec" }"#).is_err());
}

// =============================================================================
// TaskConfig Tests
// =============================================================================

#[test]
fn test_task_config_from_json() {
    let config = TaskConfig::from_json_str(
        r#"{
            "args": ["--port", "8080"],
            "jvm_options": ["-Xss1m"],
            "env": { "APP_MODE": "prod" },
            "resources": { "memory_mb": 256 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.archive_mount, constants::DEFAULT_ARCHIVE_MOUNT);
    assert_eq!(config.args, ["--port", "8080"]);
    assert_eq!(config.env.get("APP_MODE").map(String::as_str), Some("prod"));
    assert_eq!(config.resources.memory_mb, Some(256));
    assert_eq!(config.resources.pids, None);
    assert!(config.validate().is_ok());
}

#[test]
fn test_task_config_rejects_same_mounts() {
    let config = TaskConfig {
        archive_mount: "/app".to_string(),
        runtime_mount: "/app/".to_string(),
        ..TaskConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_task_config_rejects_relative_cwd() {
    let config = TaskConfig {
        cwd: Some("work".to_string()),
        ..TaskConfig::default()
    };
    assert!(config.validate().is_err());
}
