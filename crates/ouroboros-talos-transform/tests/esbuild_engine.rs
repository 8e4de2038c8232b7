//! EsbuildEngine process handling, driven by stand-in executables

use ouroboros_talos_transform::{BundleRequest, EsbuildEngine, TransformEngine, TransformOptions};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[tokio::test]
async fn test_missing_binary_is_a_diagnostic() {
    let engine = EsbuildEngine::new("/nonexistent/bin/esbuild");

    let output = engine
        .transform_file(Path::new("src/main.ts"), &TransformOptions::default())
        .await;
    assert!(output.has_errors());
    assert!(output.diagnostics[0].message.contains("Failed to run"));

    let temp = TempDir::new().unwrap();
    let request = BundleRequest::single(temp.path().join("index.js"), temp.path().join("out/index.js"));
    assert!(engine.bundle(&request).await.has_errors());
}

#[tokio::test]
async fn test_bundle_needs_an_output() {
    let engine = EsbuildEngine::new("esbuild");
    let request = BundleRequest {
        outfile: None,
        outdir: None,
        ..BundleRequest::single("index.js", "out/index.js")
    };

    let output = engine.bundle(&request).await;
    assert!(output.has_errors());
    assert!(output.artifacts.is_empty());
}

#[cfg(unix)]
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_exit_status_decides_success() {
    let temp = TempDir::new().unwrap();
    let ok = script(temp.path(), "ok-esbuild", "echo 'export const x = 1;'");
    let failing = script(temp.path(), "bad-esbuild", "echo 'unexpected end of file' >&2\nexit 1");

    let output = EsbuildEngine::new(ok)
        .transform_file(Path::new("src/x.ts"), &TransformOptions::default())
        .await;
    assert!(!output.has_errors());
    assert!(output.code.contains("export const x = 1;"));

    let output = EsbuildEngine::new(failing)
        .transform_file(Path::new("src/x.ts"), &TransformOptions::default())
        .await;
    assert!(output.has_errors());
    assert!(output.code.is_empty());
}
