//! Sliding-window per-key admission control (spec §4.2).
//!
//! Distinct from a fixed/calendar window: a key's bucket holds the
//! timestamps of its admitted requests in the trailing `window` duration,
//! pruned lazily on each call rather than reset on a clock boundary.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Result of a `check_and_record` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject { limit: u32, window_seconds: u64 },
}

struct Bucket {
    timestamps: Vec<Instant>,
}

/// Sliding-window limiter shared across all keys (client IPs, server names).
/// Sharded by key via `DashMap` so unrelated keys never contend on the same
/// lock (spec §4.2 "implementations MAY shard by key hash").
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: DashMap::new(),
        }
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    /// Prune entries older than the window, then admit if the remaining
    /// count is below the limit (I4). Uses a monotonic clock (`Instant`)
    /// for window math per spec §4.2.
    pub fn check_and_record(&self, key: &str) -> Admission {
        if self.max_requests == 0 {
            return Admission::Reject {
                limit: self.max_requests,
                window_seconds: self.window_seconds(),
            };
        }

        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                timestamps: Vec::new(),
            });

        entry.timestamps.retain(|&t| now.duration_since(t) < self.window);

        if entry.timestamps.len() as u32 >= self.max_requests {
            return Admission::Reject {
                limit: self.max_requests,
                window_seconds: self.window_seconds(),
            };
        }

        entry.timestamps.push(now);
        Admission::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn zero_limit_always_rejects() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(
            limiter.check_and_record("k"),
            Admission::Reject {
                limit: 0,
                window_seconds: 1
            }
        );
    }

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_millis(1000));
        assert_eq!(limiter.check_and_record("k"), Admission::Admit);
        assert_eq!(limiter.check_and_record("k"), Admission::Admit);
        assert_eq!(limiter.check_and_record("k"), Admission::Admit);
        assert_eq!(
            limiter.check_and_record("k"),
            Admission::Reject {
                limit: 3,
                window_seconds: 1
            }
        );
    }

    #[test]
    fn sliding_window_prunes_oldest() {
        let limiter = RateLimiter::new(3, Duration::from_millis(300));
        assert_eq!(limiter.check_and_record("k"), Admission::Admit);
        sleep(Duration::from_millis(320));
        // first entry has aged out, so a fresh slot is available
        assert_eq!(limiter.check_and_record("k"), Admission::Admit);
    }

    #[test]
    fn independent_keys_do_not_interfere() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert_eq!(limiter.check_and_record("a"), Admission::Admit);
        assert_eq!(limiter.check_and_record("b"), Admission::Admit);
        assert!(matches!(
            limiter.check_and_record("a"),
            Admission::Reject { .. }
        ));
    }
}
