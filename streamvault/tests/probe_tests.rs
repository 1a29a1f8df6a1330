//! Liveness probe behavior against stand-in probe binaries.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use streamvault::capture::probe::{LivenessProbe, ProbeVerdict};
use streamvault::config::SourceConfig;
use tempfile::TempDir;

/// Write an executable shell script standing in for the capture tool.
fn fake_probe(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

fn config_with_binary(binary: String) -> SourceConfig {
    SourceConfig {
        name: "test".to_string(),
        url: "https://example.com/live".to_string(),
        download_directory: PathBuf::from("."),
        chunk_duration_secs: 3600,
        quality: "best".to_string(),
        extra_args: vec![],
        enabled: true,
        make_dirs: true,
        binary,
    }
}

#[tokio::test]
async fn error_document_means_not_live() {
    let dir = TempDir::new().unwrap();
    let binary = fake_probe(
        dir.path(),
        "probe",
        r#"echo '{"error": "No playable streams found on this URL"}'"#,
    );

    let verdict = LivenessProbe::new(&config_with_binary(binary)).check().await;
    assert!(matches!(verdict, ProbeVerdict::NotLive { .. }));
    assert!(!verdict.is_live());
}

#[tokio::test]
async fn stream_document_means_live() {
    let dir = TempDir::new().unwrap();
    let binary = fake_probe(dir.path(), "probe", r#"echo '{"streams": {"best": {}}}'"#);

    let verdict = LivenessProbe::new(&config_with_binary(binary)).check().await;
    assert!(verdict.is_live());
}

#[tokio::test]
async fn plugin_warnings_before_the_document_are_tolerated() {
    let dir = TempDir::new().unwrap();
    let binary = fake_probe(
        dir.path(),
        "probe",
        concat!(
            "echo '[plugin.example][warning] this API may break'\n",
            r#"echo '{"streams": {"best": {}}}'"#
        ),
    );

    let verdict = LivenessProbe::new(&config_with_binary(binary)).check().await;
    assert!(verdict.is_live());
}

#[tokio::test]
async fn garbage_output_fails_safe_to_not_live() {
    let dir = TempDir::new().unwrap();
    let binary = fake_probe(dir.path(), "probe", "echo 'Traceback (most recent call last):'");

    let verdict = LivenessProbe::new(&config_with_binary(binary)).check().await;
    assert!(matches!(verdict, ProbeVerdict::Failed { .. }));
    assert!(!verdict.is_live());
}

#[tokio::test]
async fn stderr_noise_fails_safe_to_not_live() {
    let dir = TempDir::new().unwrap();
    let binary = fake_probe(
        dir.path(),
        "probe",
        concat!(
            "echo 'something broke' >&2\n",
            r#"echo '{"streams": {"best": {}}}'"#
        ),
    );

    let verdict = LivenessProbe::new(&config_with_binary(binary)).check().await;
    assert!(!verdict.is_live());
}

#[tokio::test]
async fn missing_binary_fails_safe_to_not_live() {
    let verdict = LivenessProbe::new(&config_with_binary(
        "/nonexistent/streamvault-probe".to_string(),
    ))
    .check()
    .await;
    assert!(matches!(verdict, ProbeVerdict::Failed { .. }));
}
