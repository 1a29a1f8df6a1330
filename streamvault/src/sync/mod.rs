//! Remote transfer of finalized recordings via rclone.
//!
//! A periodic pass over every source that carries a `sync` entry: list the
//! finalized recordings in its download directory (anything still bearing
//! the temp suffix is not safe to transfer), write them to a `--files-from`
//! list, and hand the batch to rclone. One source's failure never blocks
//! the others; the next pass retries whatever is still there.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::recording::TEMP_SUFFIX;
use crate::config::{self, GlobalConfig, SourceEntry, SyncConfig, DEFAULT_DOWNLOAD_DIR};
use crate::{Error, Result};

/// Default rclone binary.
pub const DEFAULT_SYNC_BINARY: &str = "rclone";

/// Default `--transfers` value.
pub const DEFAULT_TRANSFERS: u32 = 4;

/// Default operation when neither the entry nor the globals name one.
const DEFAULT_OPERATION: SyncOperation = SyncOperation::Move;

/// Supported rclone operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    /// Transfer and delete the local copy.
    Move,
    /// Transfer and keep the local copy.
    Copy,
}

impl SyncOperation {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "move" => Some(Self::Move),
            "copy" => Some(Self::Copy),
            _ => None,
        }
    }

    fn as_arg(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }
}

/// One source's sync job for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub source: String,
    pub operation: SyncOperation,
    pub source_dir: PathBuf,
    pub remote_dir: String,
    pub transfers: u32,
    pub extra_args: Vec<String>,
    pub binary: String,
    pub config_path: Option<String>,
}

/// Build the sync tasks for one pass from raw source entries.
///
/// Sources without a `sync` entry are skipped silently; a `sync` entry
/// without `remote_dir` is a configuration error and skipped loudly.
pub fn build_tasks(
    entries: &[(String, SourceEntry)],
    defaults: &SyncConfig,
    globals: &GlobalConfig,
) -> Vec<SyncTask> {
    let mut tasks = Vec::new();

    for (key, entry) in entries {
        let Some(sync) = &entry.sync else {
            debug!("No sync entry for {key}, skipping.");
            continue;
        };

        let Some(remote_dir) = sync.remote_dir.clone() else {
            error!("[{key}] remote_dir is a required value for sync. Skipping.");
            continue;
        };

        let operation_name = sync
            .operation
            .as_deref()
            .or(defaults.default_operation.as_deref());
        let operation = match operation_name {
            None => DEFAULT_OPERATION,
            Some(name) => match SyncOperation::parse(name) {
                Some(operation) => operation,
                None => {
                    error!(
                        "[{key}] Invalid operation! Valid operations are move and copy, not {name}. Skipping."
                    );
                    continue;
                }
            },
        };

        tasks.push(SyncTask {
            source: key.clone(),
            operation,
            source_dir: entry
                .download_directory
                .clone()
                .or_else(|| globals.download_directory.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            remote_dir,
            transfers: sync
                .transfers
                .or(defaults.transfers)
                .unwrap_or(DEFAULT_TRANSFERS),
            extra_args: sync.extra_args.clone(),
            binary: sync
                .binary
                .clone()
                .or_else(|| defaults.binary.clone())
                .unwrap_or_else(|| DEFAULT_SYNC_BINARY.to_string()),
            config_path: sync.config_path.clone().or_else(|| defaults.config_path.clone()),
        });
    }

    tasks
}

/// Names of finalized recordings in `dir`.
///
/// Missing directory means no stream was downloaded yet; not an error.
pub async fn list_finalized(dir: &Path) -> Result<Vec<String>> {
    if !tokio::fs::try_exists(dir)
        .await
        .map_err(|e| Error::io_path("checking download directory", dir, e))?
    {
        debug!(
            "{} does not exist (probably no stream downloaded yet) - skipping",
            dir.display()
        );
        return Ok(Vec::new());
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_path("listing download directory", dir, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("listing download directory", dir, e))?
    {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(TEMP_SUFFIX) || name.starts_with('.') {
            continue;
        }
        if entry.metadata().await.map(|m| m.is_file()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Transfer one source's finalized recordings.
pub async fn run_task(task: &SyncTask) -> Result<()> {
    let files = list_finalized(&task.source_dir).await?;
    if files.is_empty() {
        debug!("No finalized recordings for {}", task.source);
        return Ok(());
    }

    let list_path = task
        .source_dir
        .join(format!(".streamvault_files_{}.txt", Uuid::new_v4()));
    let mut list_body = files.join("\n");
    list_body.push('\n');
    tokio::fs::write(&list_path, list_body)
        .await
        .map_err(|e| Error::io_path("writing files-from list", &list_path, e))?;

    info!(
        "Sync {}: {} files from {} -> {}",
        task.operation.as_arg(),
        files.len(),
        task.source_dir.display(),
        task.remote_dir
    );

    let mut command = Command::new(&task.binary);
    if let Some(config_path) = &task.config_path {
        command.arg("--config").arg(config_path);
    }
    if tracing::enabled!(tracing::Level::DEBUG) {
        command.arg("--verbose");
    }
    command
        .arg(task.operation.as_arg())
        .arg("--files-from")
        .arg(&list_path)
        .arg(&task.source_dir)
        .arg(&task.remote_dir)
        .arg("--transfers")
        .arg(task.transfers.to_string())
        .args(&task.extra_args);

    let output = command.output().await;

    if let Err(e) = tokio::fs::remove_file(&list_path).await {
        warn!("Failed to clean up files-from list {}: {e}", list_path.display());
    }

    let output =
        output.map_err(|e| Error::process(format!("failed to run {}: {e}", task.binary)))?;

    if output.status.success() {
        debug!(
            "Sync of {} succeeded:\nstdout: {}\nstderr: {}",
            task.source,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(())
    } else {
        Err(Error::process(format!(
            "{} exited with {}: {}",
            task.binary,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

/// Periodic sync loop over the sources file.
pub struct SyncRunner {
    sources_path: PathBuf,
    globals: GlobalConfig,
    defaults: SyncConfig,
}

impl SyncRunner {
    pub fn new(sources_path: PathBuf, globals: GlobalConfig, defaults: SyncConfig) -> Self {
        Self {
            sources_path,
            globals,
            defaults,
        }
    }

    /// Run sync passes until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let interval = self.globals.intervals.sync();
        info!(
            "Remote sync running with a sleep delay of {:.1}hrs",
            interval.as_secs_f64() / 3600.0
        );
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn run_cycle(&self) {
        let entries = match config::load_entries(&self.sources_path).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Could not reload sources file for sync: {e}");
                return;
            }
        };

        let tasks = build_tasks(&entries, &self.defaults, &self.globals);
        if tasks.is_empty() {
            debug!("No sources with sync entries.");
            return;
        }

        info!("Running transfer of completed files for {} sources.", tasks.len());
        for task in &tasks {
            if let Err(e) = run_task(task).await {
                error!(source = %task.source, "Remote sync failed: {e}");
            }
        }
        info!("Completed transfers");
    }
}
