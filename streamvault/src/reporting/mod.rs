//! Status reporting fan-out.
//!
//! Supervisors push [`StatusPayload`]s into a broadcast channel; any number
//! of consumers subscribe. Publishing never blocks and never fails the
//! producer: a slow consumer lags and loses the oldest payloads rather than
//! stalling a supervision loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// One periodic status record for a source.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub source: String,
    /// Pid of the active capture process, if any.
    pub pid: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub is_live: bool,
    /// Seconds the current chunk has been downloading.
    pub chunk_elapsed_secs: f64,
    /// Seconds since the current live session started.
    pub stream_elapsed_secs: f64,
    /// Chunks produced in the current live session.
    pub chunk_count: u64,
}

/// Clonable handle for publishing and subscribing to status payloads.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusPayload>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a payload to all current subscribers. No subscribers is fine.
    pub fn publish(&self, payload: StatusPayload) {
        let _ = self.tx.send(payload);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusPayload> {
        self.tx.subscribe()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in consumer that logs every payload at debug.
pub fn spawn_log_consumer(
    broadcaster: &StatusBroadcaster,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = broadcaster.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                payload = rx.recv() => match payload {
                    Ok(payload) => {
                        debug!(
                            source = %payload.source,
                            is_live = payload.is_live,
                            chunks = payload.chunk_count,
                            "status: chunk {:.0}s, stream {:.0}s",
                            payload.chunk_elapsed_secs,
                            payload.stream_elapsed_secs
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Status log consumer lagged, skipped {skipped} payloads");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
