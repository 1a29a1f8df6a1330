//! One time-bounded capture subprocess run.
//!
//! The downloader owns exactly one capture process at a time: spawn it,
//! poll it until the chunk time budget elapses or it exits, classify why it
//! stopped, and tear everything down. Output pipes are watched through
//! [`OutputWatcher`]s so the process can never block on a full pipe buffer.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::output_watcher::OutputWatcher;
use crate::{Error, Result};

/// Lines drained from each pipe per watch tick.
const DRAIN_LINES: usize = 20;

/// Capture tool phrases that mean the stream is about to end naturally.
const END_OF_STREAM_PHRASES: [&str; 2] = [
    "failed to reload playlist: unable to open url",
    "failed to open segment",
];

/// Why a chunk run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The time budget elapsed with the process still running. The normal
    /// case: the caller cuts the stream and starts the next chunk.
    TimedOut,
    /// The process exited in the way the tool does when a stream ends.
    Finished,
    /// The process exited abnormally with the given code (-1 when killed by
    /// a signal).
    Crashed(i32),
}

/// Invocation parameters for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureCommand {
    pub binary: String,
    pub url: String,
    pub quality: String,
    pub output_path: PathBuf,
    pub extra_args: Vec<String>,
}

impl CaptureCommand {
    /// Argument list after the binary: `<url> <quality> -o <path>
    /// [--quiet | -l debug] <extra-args...>`.
    fn build_args(&self, debug_logging: bool) -> Vec<String> {
        let mut args = vec![
            self.url.clone(),
            self.quality.clone(),
            "-o".to_string(),
            self.output_path.to_string_lossy().to_string(),
        ];

        if debug_logging {
            args.extend(["-l".to_string(), "debug".to_string()]);
        } else {
            args.push("--quiet".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

enum StdoutLine {
    Progress,
    EndOfStream,
    Error,
}

fn classify_stdout_line(line: &str) -> StdoutLine {
    let lower = line.to_lowercase();
    if !lower.contains("error") {
        return StdoutLine::Progress;
    }
    if END_OF_STREAM_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
    {
        return StdoutLine::EndOfStream;
    }
    StdoutLine::Error
}

fn classify_exit(status: ExitStatus) -> ChunkOutcome {
    match status.code() {
        // The tool exits 0 on a clean end and 1 when the stream went away
        // under it; both mean the stream is over.
        Some(0) | Some(1) => ChunkOutcome::Finished,
        Some(code) => ChunkOutcome::Crashed(code),
        None => ChunkOutcome::Crashed(-1),
    }
}

/// Runs one capture subprocess per chunk for a single source.
pub struct ChunkDownloader {
    source: String,
    poll_interval: Duration,
    watcher_stop_bound: Duration,
    child: Option<Child>,
    stdout: Option<OutputWatcher>,
    stderr: Option<OutputWatcher>,
}

impl ChunkDownloader {
    pub fn new(source: &str, poll_interval: Duration, watcher_stop_bound: Duration) -> Self {
        Self {
            source: source.to_string(),
            poll_interval,
            watcher_stop_bound,
            child: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Spawn the capture process with piped stdout/stderr.
    pub fn start(&mut self, command: &CaptureCommand) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::process("a capture process is already active"));
        }

        let debug_logging = tracing::enabled!(tracing::Level::DEBUG);
        let args = command.build_args(debug_logging);
        debug!(
            source = %self.source,
            "Spawning capture process: {} {:?}", command.binary, args
        );

        let mut child = Command::new(&command.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn {}: {e}", command.binary)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("failed to capture stderr"))?;

        let mut stdout_watcher = OutputWatcher::new("stdout");
        stdout_watcher.attach(stdout);
        let mut stderr_watcher = OutputWatcher::new("stderr");
        stderr_watcher.attach(stderr);

        self.stdout = Some(stdout_watcher);
        self.stderr = Some(stderr_watcher);
        self.child = Some(child);
        Ok(())
    }

    /// OS pid of the active capture process.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Whether a capture process is currently owned.
    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    /// Poll the capture process for up to `budget`.
    ///
    /// Each tick drains and logs buffered output and checks for process
    /// exit. Errors if no process is active.
    pub async fn watch(&mut self, budget: Duration) -> Result<ChunkOutcome> {
        if self.child.is_none() {
            return Err(Error::process("watch called with no active capture process"));
        }

        let started = Instant::now();
        loop {
            if let Some(stderr) = self.stderr.as_mut() {
                for line in stderr.drain(DRAIN_LINES) {
                    error!(source = %self.source, "[capture][stderr] {line}");
                }
            }

            if let Some(stdout) = self.stdout.as_mut() {
                for line in stdout.drain(DRAIN_LINES) {
                    match classify_stdout_line(&line) {
                        StdoutLine::Progress => {
                            debug!(source = %self.source, "[capture] {}", line.trim())
                        }
                        StdoutLine::EndOfStream => {
                            debug!(
                                source = %self.source,
                                "Stream has probably ended, capture tool said: {line}"
                            );
                        }
                        StdoutLine::Error => {
                            error!(source = %self.source, "[capture] {line}")
                        }
                    }
                }
            }

            let child = self
                .child
                .as_mut()
                .ok_or_else(|| Error::process("capture process vanished during watch"))?;
            if let Some(status) = child
                .try_wait()
                .map_err(|e| Error::process(format!("failed to poll capture process: {e}")))?
            {
                debug!(source = %self.source, "Capture process exited with {status}");
                return Ok(classify_exit(status));
            }

            if started.elapsed() >= budget {
                return Ok(ChunkOutcome::TimedOut);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Kill the capture process if it is still running and wait (bounded)
    /// for both pipe watcher tasks to end.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(source = %self.source, "Killing capture process");
                    if let Err(e) = child.kill().await {
                        warn!(source = %self.source, "Failed to kill capture process: {e}");
                    }
                }
                Err(e) => {
                    warn!(source = %self.source, "Failed to poll capture process: {e}");
                }
            }
            let _ = child.wait().await;
        }

        let watchers: Vec<OutputWatcher> = self
            .stdout
            .take()
            .into_iter()
            .chain(self.stderr.take())
            .collect();
        for watcher in &watchers {
            watcher.abandon();
        }

        let before = Instant::now();
        let mut said = false;
        while watchers.iter().any(|w| !w.is_finished()) {
            if !said {
                debug!(source = %self.source, "Waiting for stdout and stderr watcher tasks to stop");
                said = true;
            }
            if before.elapsed() >= self.watcher_stop_bound {
                warn!(
                    source = %self.source,
                    "Watcher tasks did not stop within {:?}, moving on",
                    self.watcher_stop_bound
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if said {
            debug!(
                source = %self.source,
                "Watcher tasks stopped (took {:?})",
                before.elapsed()
            );
        }

        for watcher in &watchers {
            let dropped = watcher.dropped_lines();
            if dropped > 0 {
                warn!(source = %self.source, "Dropped {dropped} buffered output lines");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_order_and_verbosity() {
        let command = CaptureCommand {
            binary: "streamlink".to_string(),
            url: "https://example.com/live".to_string(),
            quality: "best".to_string(),
            output_path: PathBuf::from("/tmp/out.ts.part"),
            extra_args: vec!["--retry-open".to_string(), "3".to_string()],
        };

        assert_eq!(
            command.build_args(false),
            vec![
                "https://example.com/live",
                "best",
                "-o",
                "/tmp/out.ts.part",
                "--quiet",
                "--retry-open",
                "3",
            ]
        );
        assert_eq!(
            command.build_args(true)[4..6],
            ["-l".to_string(), "debug".to_string()]
        );
    }

    #[test]
    fn stdout_line_classification() {
        assert!(matches!(
            classify_stdout_line("[download] 12.5 MB (1m2s @ 2.1 MB/s)"),
            StdoutLine::Progress
        ));
        assert!(matches!(
            classify_stdout_line(
                "[stream.hls][error] Failed to reload playlist: Unable to open URL"
            ),
            StdoutLine::EndOfStream
        ));
        assert!(matches!(
            classify_stdout_line("[stream.hls][error] Failed to open segment 1234"),
            StdoutLine::EndOfStream
        ));
        assert!(matches!(
            classify_stdout_line("error: Unable to validate key"),
            StdoutLine::Error
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exit_classification() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(classify_exit(ExitStatus::from_raw(0)), ChunkOutcome::Finished);
        // Raw wait status encodes the exit code in the high byte.
        assert_eq!(
            classify_exit(ExitStatus::from_raw(1 << 8)),
            ChunkOutcome::Finished
        );
        assert_eq!(
            classify_exit(ExitStatus::from_raw(2 << 8)),
            ChunkOutcome::Crashed(2)
        );
        // Killed by SIGKILL: no exit code.
        assert_eq!(
            classify_exit(ExitStatus::from_raw(9)),
            ChunkOutcome::Crashed(-1)
        );
    }

    #[tokio::test]
    async fn watch_without_process_is_an_error() {
        let mut downloader = ChunkDownloader::new(
            "test",
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        assert!(downloader.watch(Duration::from_secs(1)).await.is_err());
    }
}
