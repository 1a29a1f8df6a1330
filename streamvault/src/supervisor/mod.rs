//! Per-source supervision loop.
//!
//! One supervisor per configured source, running in its own task with its
//! own cancellation token so nothing it does can affect another source. The
//! loop polls the capture tool for liveness and, while live, records
//! consecutive time-bounded chunks, retrying after capture crashes up to a
//! consecutive-crash limit before falling back to liveness polling.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::capture::chunk::{CaptureCommand, ChunkDownloader, ChunkOutcome};
use crate::capture::probe::{LivenessProbe, ProbeVerdict};
use crate::capture::recording;
use crate::config::{Intervals, SourceConfig};
use crate::reporting::{StatusBroadcaster, StatusPayload};
use crate::utils::{fs, time};

/// Why the download loop handed control back to liveness polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// The stream ended on its own.
    Ended,
    /// Too many consecutive capture crashes; give the source a rest.
    EndedWithError,
}

/// Live snapshot the status emission task reads from.
#[derive(Default)]
struct StatusState {
    pid: Option<u32>,
    is_live: bool,
    chunk_started: Option<Instant>,
    stream_started: Option<Instant>,
    chunk_count: u64,
}

/// The per-source state machine.
pub struct SourceSupervisor {
    config: SourceConfig,
    intervals: Intervals,
    cancel: CancellationToken,
    status: Option<StatusBroadcaster>,
    state: Arc<Mutex<StatusState>>,
}

impl SourceSupervisor {
    pub fn new(
        config: SourceConfig,
        intervals: Intervals,
        cancel: CancellationToken,
        status: Option<StatusBroadcaster>,
    ) -> Self {
        Self {
            config,
            intervals,
            cancel,
            status,
            state: Arc::new(Mutex::new(StatusState::default())),
        }
    }

    /// Run the supervisor until its token is cancelled or a fatal error
    /// occurs. Always finishes with an orderly shutdown pass.
    pub async fn run(self) -> Result<()> {
        info!(
            source = %self.config.name,
            url = %self.config.url,
            download_directory = %self.config.download_directory.display(),
            chunk_duration_secs = self.config.chunk_duration_secs,
            quality = %self.config.quality,
            "Launching archiver"
        );

        if self.config.make_dirs
            && let Err(e) = fs::ensure_dir_all(&self.config.download_directory).await
        {
            error!(
                source = %self.config.name,
                "Could not create download directory, check its permissions: {e}"
            );
            return Err(e);
        }

        // Finalize anything a previous unclean shutdown left behind.
        if let Err(e) =
            recording::recover_partials(&self.config.download_directory, &self.config.name).await
        {
            warn!(source = %self.config.name, "Recovery pass failed: {e}");
        }

        let status_cancel = CancellationToken::new();
        let status_task = self.spawn_status_task(status_cancel.clone());

        let result = self.supervise().await;
        if let Err(e) = &result {
            error!(source = %self.config.name, "Supervisor loop failed: {e}");
        }

        status_cancel.cancel();
        if let Some(task) = status_task {
            let _ = task.await;
        }

        // The download loop tears its subprocess down on every exit path, so
        // only the finalization pass is left to do here.
        if let Err(e) =
            recording::recover_partials(&self.config.download_directory, &self.config.name).await
        {
            warn!(source = %self.config.name, "Shutdown recovery pass failed: {e}");
        }
        debug!(source = %self.config.name, "Supervisor exited");
        result
    }

    /// Outer loop: poll liveness, archive while live, sleep, repeat.
    async fn supervise(&self) -> Result<()> {
        let mut not_live_streak: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let probe = LivenessProbe::new(&self.config);
            let verdict = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                verdict = probe.check() => verdict,
            };

            if verdict.is_live() {
                info!(source = %self.config.name, "{} is live, archiving started", self.config.name);
                not_live_streak = 0;
                {
                    let mut state = self.state.lock();
                    state.is_live = true;
                    state.stream_started = Some(Instant::now());
                    state.chunk_count = 0;
                }

                let end = self.download_loop().await?;

                {
                    let mut state = self.state.lock();
                    state.is_live = false;
                    state.pid = None;
                    state.chunk_started = None;
                }
                match end {
                    StreamEnd::Ended => info!(source = %self.config.name, "Stream has ended."),
                    StreamEnd::EndedWithError => warn!(
                        source = %self.config.name,
                        "Stream archiving aborted after repeated capture crashes"
                    ),
                }
            } else {
                if let ProbeVerdict::Failed { reason } = &verdict {
                    error!(source = %self.config.name, "Liveness probe failed: {reason}");
                }
                // Say it once per streak at info, then keep quiet-ish.
                if not_live_streak == 0 {
                    info!(source = %self.config.name, "{} is not currently live.", self.config.name);
                } else {
                    debug!(source = %self.config.name, "{} is not currently live.", self.config.name);
                }
                not_live_streak = not_live_streak.saturating_add(1);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.intervals.liveness()) => {}
            }
        }
    }

    /// Inner loop: one iteration per chunk, until the stream ends, crashes
    /// out, or the supervisor is cancelled.
    async fn download_loop(&self) -> Result<StreamEnd> {
        let mut errors: u32 = 0;
        let mut downloader = ChunkDownloader::new(
            &self.config.name,
            self.intervals.watch_tick(),
            self.intervals.watcher_stop(),
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(StreamEnd::Ended);
            }

            let start_ts = time::utc_timestamp();
            let file_name = recording::chunk_file_name(&start_ts, &self.config.name);
            info!(source = %self.config.name, "Beginning stream download of {file_name}");

            let command = CaptureCommand {
                binary: self.config.binary.clone(),
                url: self.config.url.clone(),
                quality: self.config.quality.clone(),
                output_path: self.config.download_directory.join(&file_name),
                extra_args: self.config.extra_args.clone(),
            };

            if let Err(e) = downloader.start(&command) {
                error!(source = %self.config.name, "Failed to start capture process: {e}");
                errors += 1;
                if errors > self.intervals.crash_limit {
                    return Ok(StreamEnd::EndedWithError);
                }
                // Pause one tick so a missing binary cannot spin hot.
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(StreamEnd::Ended),
                    _ = tokio::time::sleep(self.intervals.watch_tick()) => {}
                }
                continue;
            }

            {
                let mut state = self.state.lock();
                state.pid = downloader.pid();
                state.chunk_started = Some(Instant::now());
                state.chunk_count += 1;
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => None,
                outcome = downloader.watch(self.config.chunk_duration()) => Some(outcome),
            };

            downloader.stop().await;
            {
                let mut state = self.state.lock();
                state.pid = None;
                state.chunk_started = None;
            }

            let end_ts = time::utc_timestamp();
            if let Err(e) = recording::finalize_chunk(
                &self.config.download_directory,
                &start_ts,
                &end_ts,
                &self.config.name,
            )
            .await
            {
                warn!(source = %self.config.name, "Failed to finalize chunk: {e}");
            }

            let Some(outcome) = outcome else {
                // Cancelled mid-chunk; the kill and finalize above already ran.
                return Ok(StreamEnd::Ended);
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(source = %self.config.name, "Chunk watchdog failed: {e}");
                    ChunkOutcome::Crashed(-1)
                }
            };

            match outcome {
                ChunkOutcome::TimedOut => {
                    info!(source = %self.config.name, "Cutting stream");
                }
                ChunkOutcome::Finished => return Ok(StreamEnd::Ended),
                ChunkOutcome::Crashed(code) => {
                    errors += 1;
                    warn!(
                        source = %self.config.name,
                        "Capture process crashed with code {code} ({errors}/{} before giving up)",
                        self.intervals.crash_limit
                    );
                    if errors > self.intervals.crash_limit {
                        return Ok(StreamEnd::EndedWithError);
                    }
                }
            }
        }
    }

    fn spawn_status_task(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let broadcaster = self.status.clone()?;
        let state = Arc::clone(&self.state);
        let source = self.config.name.clone();
        let interval = self.intervals.status();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let payload = {
                            let state = state.lock();
                            StatusPayload {
                                source: source.clone(),
                                pid: state.pid,
                                timestamp: Utc::now(),
                                is_live: state.is_live,
                                chunk_elapsed_secs: state
                                    .chunk_started
                                    .map(|t| t.elapsed().as_secs_f64())
                                    .unwrap_or(0.0),
                                stream_elapsed_secs: state
                                    .stream_started
                                    .filter(|_| state.is_live)
                                    .map(|t| t.elapsed().as_secs_f64())
                                    .unwrap_or(0.0),
                                chunk_count: state.chunk_count,
                            }
                        };
                        broadcaster.publish(payload);
                    }
                }
            }
        }))
    }
}
