//! Capture subprocess management.
//!
//! Everything that touches the external capture tool lives here: the
//! liveness probe, the per-chunk subprocess lifecycle, the non-blocking
//! pipe watchers, and the recording-file naming/finalization rules.

pub mod chunk;
pub mod output_watcher;
pub mod probe;
pub mod recording;

pub use chunk::{CaptureCommand, ChunkDownloader, ChunkOutcome};
pub use output_watcher::OutputWatcher;
pub use probe::{LivenessProbe, ProbeVerdict};
