//! Chunk downloader lifecycle against stand-in capture processes.

#![cfg(unix)]

use std::time::{Duration, Instant};

use streamvault::capture::chunk::{CaptureCommand, ChunkDownloader, ChunkOutcome};
use tempfile::TempDir;

/// With `sh` as the "capture tool", the argv `<url> <quality> -o <path>`
/// becomes `sh -c '<script>' -o <path>`, so `$1` is the output path.
fn sh_command(script: &str, dir: &TempDir) -> CaptureCommand {
    CaptureCommand {
        binary: "sh".to_string(),
        url: "-c".to_string(),
        quality: script.to_string(),
        output_path: dir.path().join("20240101_120000_test.ts.part"),
        extra_args: vec![],
    }
}

fn downloader() -> ChunkDownloader {
    ChunkDownloader::new("test", Duration::from_millis(100), Duration::from_secs(2))
}

#[tokio::test]
async fn long_running_process_times_out_at_the_budget() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("sleep 30", &dir)).unwrap();

    let budget = Duration::from_secs(1);
    let before = Instant::now();
    let outcome = downloader.watch(budget).await.unwrap();
    let elapsed = before.elapsed();

    assert_eq!(outcome, ChunkOutcome::TimedOut);
    assert!(elapsed >= budget, "returned before the budget: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "late by more than polling slack: {elapsed:?}");

    let before = Instant::now();
    downloader.stop().await;
    assert!(before.elapsed() < Duration::from_secs(3));
    assert!(!downloader.is_active());
}

#[tokio::test]
async fn clean_exit_is_finished() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("exit 0", &dir)).unwrap();

    let outcome = downloader.watch(Duration::from_secs(10)).await.unwrap();
    assert_eq!(outcome, ChunkOutcome::Finished);
    downloader.stop().await;
}

#[tokio::test]
async fn stream_gone_exit_code_is_finished() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("exit 1", &dir)).unwrap();

    let outcome = downloader.watch(Duration::from_secs(10)).await.unwrap();
    assert_eq!(outcome, ChunkOutcome::Finished);
    downloader.stop().await;
}

#[tokio::test]
async fn abnormal_exit_is_a_crash() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("exit 3", &dir)).unwrap();

    let outcome = downloader.watch(Duration::from_secs(10)).await.unwrap();
    assert_eq!(outcome, ChunkOutcome::Crashed(3));
    downloader.stop().await;
}

#[tokio::test]
async fn death_by_signal_is_a_crash() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("kill -9 $$", &dir)).unwrap();

    let outcome = downloader.watch(Duration::from_secs(10)).await.unwrap();
    assert_eq!(outcome, ChunkOutcome::Crashed(-1));
    downloader.stop().await;
}

#[tokio::test]
async fn double_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut downloader = downloader();
    downloader.start(&sh_command("sleep 5", &dir)).unwrap();
    assert!(downloader.start(&sh_command("sleep 5", &dir)).is_err());
    downloader.stop().await;
}
