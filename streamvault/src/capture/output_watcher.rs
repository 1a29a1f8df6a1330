//! Non-blocking subprocess output watcher.
//!
//! A reader task per pipe feeds a bounded channel; the supervision loop
//! drains buffered lines without ever blocking. The reader must also never
//! block: when the buffer is full, lines are dropped and counted rather
//! than applying backpressure, so a stalled consumer can never wedge
//! shutdown behind a reader stuck mid-send.
//!
//! The watcher is restart-safe: a reader that stops on a transient read
//! error hands its stream back, and the next `drain` call respawns a reader
//! against it. Naive one-shot readers lose buffered output at pipe-close
//! boundaries; this contract is what keeps the final lines of a dying
//! capture process observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Buffered line capacity per pipe.
const BUFFER_LINES: usize = 512;

type PipeReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Watches one stdout/stderr pipe, buffering decoded lines.
pub struct OutputWatcher {
    label: &'static str,
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
    /// Holds the stream while no reader task owns it.
    slot: Arc<Mutex<Option<PipeReader>>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

impl OutputWatcher {
    pub fn new(label: &'static str) -> Self {
        let (tx, rx) = mpsc::channel(BUFFER_LINES);
        Self {
            label,
            tx,
            rx,
            slot: Arc::new(Mutex::new(None)),
            task: None,
            cancel: CancellationToken::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hand the watcher a stream to read and start a reader task for it.
    pub fn attach<R>(&mut self, stream: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        *self.slot.lock() = Some(BufReader::new(Box::new(stream)));
        self.spawn_reader();
    }

    /// Drain up to `max_lines` buffered lines without blocking.
    ///
    /// Returns an empty vec when nothing is buffered. If the reader task has
    /// died but its stream was handed back, a fresh reader is started first.
    pub fn drain(&mut self, max_lines: usize) -> Vec<String> {
        if self.task.as_ref().is_none_or(JoinHandle::is_finished) {
            self.spawn_reader();
        }

        let mut lines = Vec::new();
        while lines.len() < max_lines {
            match self.rx.try_recv() {
                Ok(line) => lines.push(line),
                Err(_) => break,
            }
        }
        lines
    }

    /// Whether the reader task has ended (or never started).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Tell the reader task to stop; it exits at the next read boundary.
    pub fn abandon(&self) {
        self.cancel.cancel();
    }

    /// Lines dropped because the buffer was full.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn spawn_reader(&mut self) {
        let Some(reader) = self.slot.lock().take() else {
            return;
        };

        let label = self.label;
        let tx = self.tx.clone();
        let slot = Arc::clone(&self.slot);
        let cancel = self.cancel.clone();
        let dropped = Arc::clone(&self.dropped);

        self.task = Some(tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        trace!("{label} watcher abandoned");
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if tx.try_send(line).is_err() {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(None) => {
                            trace!("{label} closed");
                            break;
                        }
                        Err(e) => {
                            // Transient failure: hand the stream back so the
                            // next drain can restart reading.
                            debug!("{label} watcher read error, parking stream: {e}");
                            *slot.lock() = Some(lines.into_inner());
                            break;
                        }
                    }
                }
            }
        }));
    }
}

impl Drop for OutputWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
