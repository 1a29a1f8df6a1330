//! Filesystem helpers with consistent error context (operation + path).

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path("creating directory", path, e))
}

/// Synchronous variant for startup paths that run before the runtime loops.
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path("creating directory", path, e))
}
