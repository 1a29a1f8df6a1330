//! Recording file naming, finalization and crash recovery.
//!
//! A chunk being written lives at `<start-ts>_<name>.ts.part`. Once the
//! chunk ends (time boundary, natural stream end, or crash) it is renamed to
//! `<start-ts>_to_<end-ts>_<name>.ts`; that rename is the only signal that
//! the file is complete and safe to transfer. Timestamps are fixed-width
//! (see [`crate::utils::time`]) so both fields and the embedded source name
//! can be recovered by slicing at fixed offsets.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::utils::time::{TIMESTAMP_LEN, is_valid_timestamp, timestamp_from_system_time};
use crate::{Error, Result};

/// Marker suffix for a chunk that is still being written.
pub const TEMP_SUFFIX: &str = ".part";

/// Recording container extension.
pub const RECORDING_EXT: &str = ".ts";

/// In-progress chunk filename: `<start-ts>_<name>.ts.part`.
pub fn chunk_file_name(start_ts: &str, source: &str) -> String {
    format!("{start_ts}_{source}{RECORDING_EXT}{TEMP_SUFFIX}")
}

/// Finalized chunk filename: `<start-ts>_to_<end-ts>_<name>.ts`.
pub fn finalized_file_name(start_ts: &str, end_ts: &str, source: &str) -> String {
    format!("{start_ts}_to_{end_ts}_{source}{RECORDING_EXT}")
}

/// Rename a finished chunk to its finalized name.
///
/// Returns the finalized path, or `None` when the temp file does not exist
/// (the capture process can die before producing any output).
pub async fn finalize_chunk(
    dir: &Path,
    start_ts: &str,
    end_ts: &str,
    source: &str,
) -> Result<Option<PathBuf>> {
    let temp = dir.join(chunk_file_name(start_ts, source));
    if !tokio::fs::try_exists(&temp)
        .await
        .map_err(|e| Error::io_path("checking recording file", &temp, e))?
    {
        return Ok(None);
    }

    let finalized = dir.join(finalized_file_name(start_ts, end_ts, source));
    tokio::fs::rename(&temp, &finalized)
        .await
        .map_err(|e| Error::io_path("finalizing recording file", &temp, e))?;
    debug!("Finalized {}", finalized.display());
    Ok(Some(finalized))
}

/// Compute the finalized name for a stale temp file, if it belongs to
/// `source`.
///
/// The embedded start timestamp and source name are recovered by fixed
/// offsets; the name comparison is case-insensitive. Returns `None` for
/// files that are not temp-suffixed recordings of this source.
pub fn recovered_name(file_name: &str, source: &str, end_ts: &str) -> Option<String> {
    let suffix = format!("{RECORDING_EXT}{TEMP_SUFFIX}");
    let stem = file_name.strip_suffix(&suffix)?;

    let start_ts = stem.get(..TIMESTAMP_LEN)?;
    if !is_valid_timestamp(start_ts) {
        return None;
    }
    if stem.as_bytes().get(TIMESTAMP_LEN) != Some(&b'_') {
        return None;
    }

    let embedded = stem.get(TIMESTAMP_LEN + 1..)?;
    if !embedded.eq_ignore_ascii_case(source) {
        return None;
    }

    Some(finalized_file_name(start_ts, end_ts, embedded))
}

/// Finalize any stale temp-suffixed files for `source` in `dir`.
///
/// Run at supervisor startup and again on shutdown, so an unclean exit never
/// leaves a chunk stranded with the temp suffix (and therefore invisible to
/// the sync step). The file's last-modified time stands in for the missing
/// end timestamp.
pub async fn recover_partials(dir: &Path, source: &str) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io_path("scanning download directory", dir, e))?;

    let mut recovered = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("scanning download directory", dir, e))?
    {
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };

        let end_ts = timestamp_from_system_time(modified);
        let Some(new_name) = recovered_name(&file_name, source, &end_ts) else {
            continue;
        };

        let from = entry.path();
        let to = dir.join(&new_name);
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| Error::io_path("recovering recording file", &from, e))?;
        info!("Recovered unfinished recording {file_name} -> {new_name}");
        recovered += 1;
    }

    debug!("Cleaned up {recovered} unfinished recordings");
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_and_finalized_names() {
        assert_eq!(
            chunk_file_name("20240101_120000", "test"),
            "20240101_120000_test.ts.part"
        );
        assert_eq!(
            finalized_file_name("20240101_120000", "20240101_130000", "test"),
            "20240101_120000_to_20240101_130000_test.ts"
        );
    }

    #[test]
    fn recovers_temp_file_with_mtime_as_end() {
        assert_eq!(
            recovered_name("20240101_120000_test.ts.part", "test", "20240101_130000"),
            Some("20240101_120000_to_20240101_130000_test.ts".to_string())
        );
    }

    #[test]
    fn source_name_match_is_case_insensitive() {
        assert_eq!(
            recovered_name("20240101_120000_Test.ts.part", "TEST", "20240101_130000"),
            Some("20240101_120000_to_20240101_130000_Test.ts".to_string())
        );
    }

    #[test]
    fn ignores_files_of_other_sources() {
        assert!(recovered_name("20240101_120000_other.ts.part", "test", "20240101_130000").is_none());
    }

    #[test]
    fn ignores_finalized_and_unrelated_files() {
        assert!(
            recovered_name(
                "20240101_120000_to_20240101_130000_test.ts",
                "test",
                "20240101_140000"
            )
            .is_none()
        );
        assert!(recovered_name("notes.txt", "test", "20240101_130000").is_none());
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert!(recovered_name("2024_not_a_ts_test.ts.part", "test", "20240101_130000").is_none());
        assert!(recovered_name("test.ts.part", "test", "20240101_130000").is_none());
    }

    #[test]
    fn source_names_may_contain_underscores() {
        assert_eq!(
            recovered_name(
                "20240101_120000_my_stream.ts.part",
                "my_stream",
                "20240101_130000"
            ),
            Some("20240101_120000_to_20240101_130000_my_stream.ts".to_string())
        );
    }
}
