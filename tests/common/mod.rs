//! Fixtures shared by the integration tests: archives, a fake runtime home,
//! fake system directories and fake container runtimes.

#![allow(dead_code)]

use jarbox::{
    ArchiveValidator, BundleBuilder, ContainerBundle, EngineConfig, RuntimeLocator, TaskConfig,
};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Variable name no test environment sets, so discovery never depends on
/// the host's `JAVA_HOME`.
pub const UNSET_HOME_VAR: &str = "JARBOX_TEST_RUNTIME_HOME_NEVER_SET";

/// Writes a ZIP archive with the given entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Writes a runnable archive declaring `com.example.Main`.
pub fn write_jar(path: &Path) {
    write_zip(
        path,
        &[
            (
                "META-INF/MANIFEST.MF",
                b"Manifest-Version: 1.0\r\nMain-Class: com.example.Main\r\n\r\n",
            ),
            ("com/example/Main.class", b"\xca\xfe\xba\xbe"),
        ],
    );
}

/// Writes an executable file.
pub fn write_executable(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Creates `<root>/<name>/bin/java` and returns the home directory.
pub fn fake_runtime_home(root: &Path, name: &str) -> PathBuf {
    let home = root.join(name);
    write_executable(&home.join("bin/java"), "#!/bin/sh\nexit 0\n");
    home
}

/// Creates stand-in system directories and returns their paths.
pub fn fake_system_dirs(root: &Path) -> Vec<PathBuf> {
    ["bin", "lib"]
        .iter()
        .map(|name| {
            let dir = root.join("host").join(name);
            fs::create_dir_all(&dir).unwrap();
            dir
        })
        .collect()
}

/// Writes a fake runc-compatible runtime.
///
/// `run_body` executes for `run --bundle <dir> <id>` after checking that
/// `config.json` exists (exit 99 otherwise). Every other subcommand exits 1.
pub fn fake_run_runtime(dir: &Path, run_body: &str) -> PathBuf {
    let path = dir.join("fake-runtime");
    let script = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
         run)\n\
         test -f \"$3/config.json\" || exit 99\n\
         {}\n\
         ;;\n\
         *) exit 1 ;;\n\
         esac\n",
        run_body
    );
    write_executable(&path, &script);
    path
}

/// Engine configuration pointing at scratch directories and `runtime`.
pub fn engine_config(scratch: &Path, runtime: &Path) -> EngineConfig {
    let mut config = EngineConfig::default()
        .with_runtime_executable(runtime)
        .with_bundle_root(scratch.join("bundles"))
        .with_system_mounts(fake_system_dirs(scratch))
        .with_optional_system_mounts(Vec::new())
        .with_runtime_fallbacks(Vec::new());
    config.runtime_home_var = UNSET_HOME_VAR.to_string();
    config
}

/// Polls until `path` exists.
pub async fn wait_for_file(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", path.display());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Builds a bundle for a fresh archive and runtime home under `root`.
pub fn sample_bundle(root: &Path) -> ContainerBundle {
    let task_dir = root.join("task");
    fs::create_dir_all(&task_dir).unwrap();
    write_jar(&task_dir.join("app.jar"));

    let artifact = ArchiveValidator::new().validate(&task_dir).unwrap();
    let home = fake_runtime_home(root, "jdk");
    let runtime = RuntimeLocator::new()
        .with_fallbacks(Vec::new())
        .locate_with(None, &[home])
        .unwrap();

    BundleBuilder::new()
        .with_system_mounts(fake_system_dirs(root))
        .with_optional_system_mounts(Vec::new())
        .build(&artifact, &runtime, &TaskConfig::default())
        .unwrap()
}
