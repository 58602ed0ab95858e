//! Sliding-window input rate limiting.
//!
//! Three independent axes share one 1-second window: mouse moves, button
//! events (clicks and wheel), and keys. The window resets lazily on any
//! check past its boundary; everything over an axis cap inside the window
//! is dropped and counted.

use airdesk_common::time::now_ms;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tracing::debug;

pub const MAX_MOVES_PER_SEC: u32 = 500;
pub const MAX_CLICKS_PER_SEC: u32 = 50;
pub const MAX_KEYS_PER_SEC: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Move,
    Click,
    Key,
}

#[derive(Default)]
pub struct RateLimiter {
    window_start_ms: AtomicI64,
    moves: AtomicU32,
    clicks: AtomicU32,
    keys: AtomicU32,
    pub dropped_moves: AtomicU64,
    pub dropped_clicks: AtomicU64,
    pub dropped_keys: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an axis against its cap, using the wall clock.
    pub fn allow(&self, axis: Axis) -> bool {
        self.allow_at(axis, now_ms())
    }

    /// Check an axis at an explicit time (ms since the epoch).
    pub fn allow_at(&self, axis: Axis, now_ms: i64) -> bool {
        self.maybe_reset(now_ms);
        let (counter, max, dropped) = match axis {
            Axis::Move => (&self.moves, MAX_MOVES_PER_SEC, &self.dropped_moves),
            Axis::Click => (&self.clicks, MAX_CLICKS_PER_SEC, &self.dropped_clicks),
            Axis::Key => (&self.keys, MAX_KEYS_PER_SEC, &self.dropped_keys),
        };
        if counter.fetch_add(1, Ordering::AcqRel) >= max {
            dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn maybe_reset(&self, now_ms: i64) {
        let start = self.window_start_ms.load(Ordering::Acquire);
        if now_ms - start >= 1000 {
            self.window_start_ms.store(now_ms, Ordering::Release);
            let over_moves = self.moves.load(Ordering::Acquire) as i64 - MAX_MOVES_PER_SEC as i64;
            let over_clicks =
                self.clicks.load(Ordering::Acquire) as i64 - MAX_CLICKS_PER_SEC as i64;
            let over_keys = self.keys.load(Ordering::Acquire) as i64 - MAX_KEYS_PER_SEC as i64;
            if over_moves > 0 || over_clicks > 0 || over_keys > 0 {
                debug!(
                    "Input rate limit hit - dropped moves:{} clicks:{} keys:{}",
                    over_moves.max(0),
                    over_clicks.max(0),
                    over_keys.max(0)
                );
            }
            self.moves.store(0, Ordering::Release);
            self.clicks.store(0, Ordering::Release);
            self.keys.store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moves_capped_at_500() {
        let rl = RateLimiter::new();
        let t0 = 1_000_000;
        let allowed = (0..600).filter(|_| rl.allow_at(Axis::Move, t0)).count();
        assert_eq!(allowed, 500);
        assert_eq!(rl.dropped_moves.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_axes_are_independent() {
        let rl = RateLimiter::new();
        let t0 = 1_000_000;
        for _ in 0..MAX_CLICKS_PER_SEC {
            assert!(rl.allow_at(Axis::Click, t0));
        }
        assert!(!rl.allow_at(Axis::Click, t0));
        // Keys still have headroom in the same window.
        assert!(rl.allow_at(Axis::Key, t0));
        assert_eq!(rl.dropped_clicks.load(Ordering::Relaxed), 1);
        assert_eq!(rl.dropped_keys.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_window_resets_after_one_second() {
        let rl = RateLimiter::new();
        let t0 = 1_000_000;
        for _ in 0..MAX_KEYS_PER_SEC + 10 {
            rl.allow_at(Axis::Key, t0);
        }
        assert_eq!(rl.dropped_keys.load(Ordering::Relaxed), 10);
        // One second later the counter restarts; drops accumulate.
        assert!(rl.allow_at(Axis::Key, t0 + 1000));
        assert_eq!(rl.dropped_keys.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_drop_counter_matches_rejections() {
        let rl = RateLimiter::new();
        let t0 = 5_000;
        let mut rejected = 0;
        for _ in 0..1200 {
            if !rl.allow_at(Axis::Move, t0) {
                rejected += 1;
            }
        }
        assert_eq!(rl.dropped_moves.load(Ordering::Relaxed), rejected);
        assert_eq!(rejected, 700);
    }
}
