//! Helpers shared across the pipeline: display time zone, retry backoff,
//! log truncation, slugs, and output directory checks.

use crate::error::SinkError;
use chrono::{DateTime, FixedOffset, Utc};
use rand::{Rng, rng};
use std::fs as stdfs;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// The zone the feeds are edited in (UTC+8). Used for "today" and for the
/// timestamps shown in reports.
pub fn display_zone() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

/// `YYYY-MM-DD HH:MM` in the display zone.
pub fn format_display_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&display_zone())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// `YYYY-MM-DD` in the display zone.
pub fn display_date(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&display_zone())
        .format("%Y-%m-%d")
        .to_string()
}

/// Delay before retry number `attempt` (1-based).
///
/// ```text
/// delay = min(base * 2^(attempt-1), max) + jitter(0..=min(base, 250ms))
/// ```
pub fn backoff_delay(attempt: usize, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let delay = base.saturating_mul(1u32 << exponent).min(max);
    let jitter_cap = base.as_millis().min(250) as u64;
    let jitter_ms: u64 = rng().random_range(0..=jitter_cap);
    delay + Duration::from_millis(jitter_ms)
}

/// Truncate a string for logging, respecting char boundaries.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Convert a title to a file-name friendly slug.
///
/// ```ignore
/// assert_eq!(slugify_title("Flash Analysis - 2025-11-28"), "flash-analysis---2025-11-28");
/// ```
pub fn slugify_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), SinkError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| SinkError::NotWritable {
            path: path.to_string(),
            source,
        })?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(source) => Err(SinkError::NotWritable {
            path: path.to_string(),
            source,
        }),
    }
}
