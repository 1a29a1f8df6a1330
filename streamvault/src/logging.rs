//! Logging initialization.
//!
//! Console logging always; optional daily-rolling file logging when a log
//! directory is configured. The `RUST_LOG` environment variable overrides
//! the configured filter directive.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::utils::fs;
use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streamvault=info";

/// Initialize the global subscriber.
///
/// Returns the non-blocking writer guard when file logging is enabled; keep
/// it alive for the process lifetime or buffered log lines are lost.
pub fn init(config_filter: Option<&str>, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = config_filter.unwrap_or(DEFAULT_LOG_FILTER);
            EnvFilter::try_new(directive)
                .map_err(|e| Error::config(format!("invalid log filter {directive:?}: {e}")))?
        }
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    let guard = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "streamvault.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            Some(guard)
        }
        None => {
            registry
                .try_init()
                .map_err(|e| Error::Other(format!("failed to set global subscriber: {e}")))?;
            None
        }
    };

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_targets_this_crate() {
        assert!(DEFAULT_LOG_FILTER.contains("streamvault="));
    }

    #[test]
    fn invalid_directive_is_a_config_error() {
        let result = EnvFilter::try_new("not==valid==");
        assert!(result.is_err());
    }
}
