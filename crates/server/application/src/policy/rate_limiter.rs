//! In-memory sliding-window rate limiter.
//!
//! One window per scope key. Windows reset when their interval elapses;
//! keys idle for longer than twice the largest interval observed are
//! evicted opportunistically on access. State does not survive a process
//! restart by design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Minimum time between two opportunistic eviction sweeps.
const EVICTION_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct RateWindow {
    window_start: Instant,
    count: u32,
    interval: Duration,
    last_touched: Instant,
}

/// Sliding-window counter per resource scope.
///
/// Concurrent access is serialized per key by the map's per-entry locks.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    /// Largest interval seen, in seconds; drives the eviction horizon
    max_interval_secs: AtomicU64,
    last_sweep: Mutex<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            max_interval_secs: AtomicU64::new(0),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Count one action against `key`. Returns true while the window
    /// holds at most `limit` actions.
    ///
    /// If the current interval has elapsed the window resets; the count
    /// is then incremented and compared against the limit.
    pub fn allow(&self, key: &str, limit: u32, interval: Duration) -> bool {
        let now = Instant::now();
        self.max_interval_secs
            .fetch_max(interval.as_secs(), Ordering::Relaxed);

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow {
                window_start: now,
                count: 0,
                interval,
                last_touched: now,
            });

        if now.duration_since(entry.window_start) >= interval {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.interval = interval;
        entry.last_touched = now;
        let allowed = entry.count <= limit;
        drop(entry);

        self.maybe_sweep(now);

        allowed
    }

    /// Current count within the key's window, zero for unknown keys.
    pub fn current_count(&self, key: &str) -> u32 {
        self.windows
            .get(key)
            .map(|w| {
                if w.window_start.elapsed() >= w.interval {
                    0
                } else {
                    w.count
                }
            })
            .unwrap_or(0)
    }

    /// Drop a single key, or every window when `key` is `None`.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.windows.remove(key);
            }
            None => self.windows.clear(),
        }
    }

    /// Number of tracked keys (for tests and diagnostics).
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Opportunistic eviction: at most once per `EVICTION_PERIOD`, drop
    /// keys untouched for longer than twice the largest interval seen.
    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock();
            if now.duration_since(*last) < EVICTION_PERIOD {
                return;
            }
            *last = now;
        }

        let horizon =
            Duration::from_secs(self.max_interval_secs.load(Ordering::Relaxed).max(1)) * 2;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.last_touched) <= horizon);
        let evicted = before - self.windows.len();
        if evicted > 0 {
            debug!(evicted, "evicted idle rate windows");
        }
    }

    #[cfg(test)]
    fn force_sweep(&self) {
        *self.last_sweep.lock() = Instant::now() - EVICTION_PERIOD - Duration::from_secs(1);
        self.maybe_sweep(Instant::now());
    }
}
