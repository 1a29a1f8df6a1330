//! streamvault - an automatic livestream archiver.
//!
//! One supervisor per configured source polls the capture tool for liveness
//! and, while live, records the stream into consecutive time-bounded chunk
//! files. Finalized chunks are periodically handed to rclone for remote
//! transfer. A fleet orchestrator reconciles the set of running supervisors
//! against a declarative sources file reloaded on an interval.

pub mod capture;
pub mod config;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod panic_hook;
pub mod reporting;
pub mod supervisor;
pub mod sync;
pub mod utils;

pub use error::{Error, Result};
