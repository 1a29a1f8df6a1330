//! Wall-clock timestamp helpers.
//!
//! Recording filenames embed fixed-width, lexically sortable UTC timestamps
//! so that name and timestamps can be recovered by slicing at fixed offsets.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Fixed-width filename timestamp format, e.g. `20240101_120000`.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Rendered length of [`TIMESTAMP_FORMAT`].
pub const TIMESTAMP_LEN: usize = 15;

/// Current UTC time rendered in the filename timestamp format.
pub fn utc_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Render a filesystem timestamp (e.g. a file's mtime) in the filename format.
pub fn timestamp_from_system_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(TIMESTAMP_FORMAT).to_string()
}

/// Whether `value` is a well-formed filename timestamp.
pub fn is_valid_timestamp(value: &str) -> bool {
    value.len() == TIMESTAMP_LEN
        && NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_fixed_width() {
        assert_eq!(utc_timestamp().len(), TIMESTAMP_LEN);
    }

    #[test]
    fn validates_timestamps() {
        assert!(is_valid_timestamp("20240101_120000"));
        assert!(!is_valid_timestamp("20240101-120000"));
        assert!(!is_valid_timestamp("20241301_120000"));
        assert!(!is_valid_timestamp("not_a_timestamp"));
    }

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = "20240101_235959";
        let later = "20240102_000000";
        assert!(earlier < later);
    }
}
