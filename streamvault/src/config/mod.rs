//! Configuration types and loading.
//!
//! Two YAML files drive the archiver: a config file with global defaults and
//! tunables, and a sources file with the declarative list of streams to
//! archive. The sources file is reloaded by the fleet orchestrator on an
//! interval, so per-entry problems must never poison a whole reconcile
//! cycle: each entry is deserialized individually and skipped (with an error
//! log) on failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::error;

use crate::{Error, Result};

/// Default capture tool binary.
pub const DEFAULT_CAPTURE_BINARY: &str = "streamlink";

/// Default stream quality selection.
pub const DEFAULT_QUALITY: &str = "best";

/// Default chunk duration: one day.
pub const DEFAULT_CHUNK_DURATION_SECS: u64 = 86_400;

/// Default download directory.
pub const DEFAULT_DOWNLOAD_DIR: &str = ".";

/// Top-level structure of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub config: GlobalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

/// Global defaults merged under every source entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    /// Log filter directive, e.g. `streamvault=debug`. `RUST_LOG` overrides.
    pub log_filter: Option<String>,
    /// Directory for rolling log files. Console-only logging when unset.
    pub log_dir: Option<PathBuf>,
    pub download_directory: Option<PathBuf>,
    /// Capture tool binary path.
    pub binary: Option<String>,
    pub make_dirs: Option<bool>,
    #[serde(default)]
    pub intervals: Intervals,
}

/// Polling/retry tunables.
///
/// The historical defaults live here rather than being scattered as
/// hardcoded constants, so deployments can tune them per installation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Intervals {
    /// Seconds between liveness checks while a source is offline.
    pub liveness_secs: u64,
    /// Seconds between fleet reconciliation passes.
    pub reconcile_secs: u64,
    /// Seconds between chunk watch polls.
    pub watch_tick_secs: u64,
    /// Seconds between status payload emissions.
    pub status_secs: u64,
    /// Seconds between remote-sync passes.
    pub sync_secs: u64,
    /// Consecutive capture crashes tolerated before the download loop aborts.
    pub crash_limit: u32,
    /// Seconds to wait for pipe watcher tasks to stop before moving on.
    pub watcher_stop_secs: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            liveness_secs: 30,
            reconcile_secs: 5,
            watch_tick_secs: 1,
            status_secs: 3,
            sync_secs: 9_000,
            crash_limit: 3,
            watcher_stop_secs: 5,
        }
    }
}

impl Intervals {
    pub fn liveness(&self) -> Duration {
        Duration::from_secs(self.liveness_secs)
    }

    pub fn reconcile(&self) -> Duration {
        Duration::from_secs(self.reconcile_secs)
    }

    pub fn watch_tick(&self) -> Duration {
        Duration::from_secs(self.watch_tick_secs)
    }

    pub fn status(&self) -> Duration {
        Duration::from_secs(self.status_secs)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }

    pub fn watcher_stop(&self) -> Duration {
        Duration::from_secs(self.watcher_stop_secs)
    }
}

/// Global remote-sync defaults; per-source `sync` entries override these.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// rclone binary path.
    pub binary: Option<String>,
    /// rclone config file path.
    pub config_path: Option<String>,
    /// Default operation (`move` or `copy`) when an entry names none.
    pub default_operation: Option<String>,
    /// Default `--transfers` value.
    pub transfers: Option<u32>,
}

/// Status reporting settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Whether supervisors emit status payloads at all.
    pub enabled: bool,
    /// Whether the built-in consumer logs each payload at debug.
    pub log_payloads: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_payloads: true,
        }
    }
}

/// One raw entry from the sources file, before merging with global defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    pub name: Option<String>,
    pub download_directory: Option<PathBuf>,
    /// Chunk duration in seconds.
    pub chunk_duration: Option<u64>,
    pub quality: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub make_dirs: Option<bool>,
    pub binary: Option<String>,
    /// Remote-sync settings for this source; absent disables sync for it.
    pub sync: Option<SourceSyncEntry>,
}

fn default_true() -> bool {
    true
}

/// Per-source remote-sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSyncEntry {
    pub remote_dir: Option<String>,
    pub operation: Option<String>,
    pub transfers: Option<u32>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub binary: Option<String>,
    pub config_path: Option<String>,
}

/// Effective per-source configuration after merging with global defaults.
///
/// Compared structurally between reconcile cycles: any field change makes
/// the fleet restart the source's supervisor with the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub download_directory: PathBuf,
    pub chunk_duration_secs: u64,
    pub quality: String,
    pub extra_args: Vec<String>,
    pub enabled: bool,
    pub make_dirs: bool,
    pub binary: String,
}

impl SourceConfig {
    /// Merge a raw entry over the global defaults.
    ///
    /// `key` is the entry's key in the sources map; it names the source
    /// unless the entry carries an explicit `name`.
    pub fn from_entry(key: &str, entry: &SourceEntry, globals: &GlobalConfig) -> Self {
        Self {
            name: entry.name.clone().unwrap_or_else(|| key.to_string()),
            url: entry.url.clone(),
            download_directory: entry
                .download_directory
                .clone()
                .or_else(|| globals.download_directory.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            chunk_duration_secs: entry.chunk_duration.unwrap_or(DEFAULT_CHUNK_DURATION_SECS),
            quality: entry
                .quality
                .clone()
                .unwrap_or_else(|| DEFAULT_QUALITY.to_string()),
            extra_args: entry.extra_args.clone(),
            enabled: entry.enabled,
            make_dirs: entry
                .make_dirs
                .or(globals.make_dirs)
                .unwrap_or(true),
            binary: entry
                .binary
                .clone()
                .or_else(|| globals.binary.clone())
                .unwrap_or_else(|| DEFAULT_CAPTURE_BINARY.to_string()),
        }
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs(self.chunk_duration_secs)
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Option<BTreeMap<String, serde_yaml::Value>>,
}

/// Load the config file.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::io_path("reading config file", path, e))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))
}

/// Load and individually deserialize the entries of the sources file.
///
/// A whole-file read/parse failure is an error; a single malformed entry is
/// logged and skipped so the remaining sources stay manageable.
pub async fn load_entries(path: &Path) -> Result<Vec<(String, SourceEntry)>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io_path("reading sources file", path, e))?;
    let file: SourcesFile = serde_yaml::from_str(&raw)
        .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;

    let mut entries = Vec::new();
    for (key, value) in file.sources.unwrap_or_default() {
        match serde_yaml::from_value::<SourceEntry>(value) {
            Ok(entry) => entries.push((key, entry)),
            Err(e) => {
                error!(source = %key, "Skipping malformed source entry: {e}");
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_entries(yaml: &str) -> Vec<(String, SourceEntry)> {
        let file: SourcesFile = serde_yaml::from_str(yaml).unwrap();
        let mut entries = Vec::new();
        for (key, value) in file.sources.unwrap_or_default() {
            if let Ok(entry) = serde_yaml::from_value::<SourceEntry>(value) {
                entries.push((key, entry));
            }
        }
        entries
    }

    #[test]
    fn merges_entry_over_global_defaults() {
        let globals = GlobalConfig {
            download_directory: Some(PathBuf::from("/srv/recordings")),
            binary: Some("/opt/streamlink/bin/streamlink".to_string()),
            make_dirs: Some(false),
            ..GlobalConfig::default()
        };
        let entry = SourceEntry {
            url: "https://example.com/live".to_string(),
            name: None,
            download_directory: None,
            chunk_duration: Some(3600),
            quality: None,
            extra_args: vec!["--retry-open".to_string(), "3".to_string()],
            enabled: true,
            make_dirs: None,
            binary: None,
            sync: None,
        };

        let cfg = SourceConfig::from_entry("alice", &entry, &globals);
        assert_eq!(cfg.name, "alice");
        assert_eq!(cfg.download_directory, PathBuf::from("/srv/recordings"));
        assert_eq!(cfg.chunk_duration_secs, 3600);
        assert_eq!(cfg.quality, DEFAULT_QUALITY);
        assert_eq!(cfg.binary, "/opt/streamlink/bin/streamlink");
        assert!(!cfg.make_dirs);
    }

    #[test]
    fn entry_fields_override_globals() {
        let globals = GlobalConfig {
            download_directory: Some(PathBuf::from("/srv/recordings")),
            ..GlobalConfig::default()
        };
        let entry = SourceEntry {
            url: "https://example.com/live".to_string(),
            name: Some("Alice Stream".to_string()),
            download_directory: Some(PathBuf::from("/srv/alice")),
            chunk_duration: None,
            quality: Some("720p".to_string()),
            extra_args: vec![],
            enabled: true,
            make_dirs: Some(true),
            binary: None,
            sync: None,
        };

        let cfg = SourceConfig::from_entry("alice", &entry, &globals);
        assert_eq!(cfg.name, "Alice Stream");
        assert_eq!(cfg.download_directory, PathBuf::from("/srv/alice"));
        assert_eq!(cfg.quality, "720p");
        assert_eq!(cfg.chunk_duration_secs, DEFAULT_CHUNK_DURATION_SECS);
    }

    #[test]
    fn malformed_entry_does_not_poison_others() {
        let yaml = r#"
sources:
  bad:
    chunk_duration: "not a number"
  missing_url:
    quality: best
  good:
    url: https://example.com/live
"#;
        let entries = parse_entries(yaml);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "good");
    }

    #[test]
    fn empty_sources_section_is_empty_list() {
        let entries = parse_entries("sources:\n");
        assert!(entries.is_empty());
    }

    #[test]
    fn structural_equality_detects_changes() {
        let globals = GlobalConfig::default();
        let entry = SourceEntry {
            url: "https://example.com/live".to_string(),
            name: None,
            download_directory: None,
            chunk_duration: None,
            quality: None,
            extra_args: vec![],
            enabled: true,
            make_dirs: None,
            binary: None,
            sync: None,
        };
        let a = SourceConfig::from_entry("alice", &entry, &globals);
        let mut b = a.clone();
        assert_eq!(a, b);

        b.quality = "720p".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn config_file_defaults() {
        let cfg: ConfigFile = serde_yaml::from_str("config:\n  make_dirs: true\n").unwrap();
        assert_eq!(cfg.config.intervals, Intervals::default());
        assert!(!cfg.status.enabled);
        assert_eq!(cfg.config.intervals.liveness_secs, 30);
        assert_eq!(cfg.config.intervals.crash_limit, 3);
    }
}
