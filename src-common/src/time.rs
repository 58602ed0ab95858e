//! Timestamp helpers.
//!
//! Every pipeline stage and wire header uses the same clock: microseconds
//! since the Unix epoch. Millisecond reads are derived from it so that
//! watchdog arithmetic stays in one time base.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    now_us() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_us_is_monotonic_enough() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
        // Sanity: after 2020-01-01 in microseconds.
        assert!(a > 1_577_836_800_000_000);
    }

    #[test]
    fn test_ms_is_us_scaled() {
        let us = now_us();
        let ms = now_ms();
        assert!((ms - us / 1000).abs() <= 1);
    }
}
