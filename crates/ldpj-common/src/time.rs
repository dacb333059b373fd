//! Timestamp helpers shared by the polling engine, cycle FSMs, and record store.
//!
//! All in-process timestamps are seconds since a single fixed
//! [`std::time::Instant`] reference, established once at process start. This
//! keeps cycle-duration arithmetic monotonic and immune to wall-clock
//! adjustments, while still letting the record store stamp rows with a
//! human-readable local time via [`local_timestamp`].

use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Seconds elapsed since the fixed in-process reference instant.
///
/// Calling this before any other timestamp establishes the reference point;
/// all subsequent calls are relative to that first call.
#[must_use]
pub fn monotonic_secs() -> f64 {
    epoch().elapsed().as_secs_f64()
}

/// Local wall-clock timestamp formatted `YYYY-MM-DD HH:MM:SS`, used for
/// persisted record timestamps and fault event logging.
#[must_use]
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a Unix timestamp (seconds) as `YYYY-MM-DD HH:MM:SS` in UTC.
#[must_use]
pub fn format_unix_secs(secs: u64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_increases() {
        let a = monotonic_secs();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = monotonic_secs();
        assert!(b > a);
    }

    #[test]
    fn test_format_unix_epoch() {
        assert_eq!(format_unix_secs(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_format_known_date() {
        // 2024-01-01 00:00:00 UTC
        assert_eq!(format_unix_secs(1_704_067_200), "2024-01-01 00:00:00");
    }
}
