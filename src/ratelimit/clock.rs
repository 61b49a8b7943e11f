//! Time sources for the rate limiter.
//!
//! All window arithmetic happens in integer milliseconds since the Unix epoch.
//! Conversion to seconds only happens when headers are rendered.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

/// A source of the current time in epoch milliseconds.
pub trait Clock: Debug + Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall clock anchored once at construction and advanced by a monotonic
/// offset, so readings never step backwards inside one process.
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch_millis: u64,
    anchor: Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            epoch_millis: Utc::now().timestamp_millis().max(0) as u64,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.epoch_millis + self.anchor.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the limiter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `now_millis`.
    pub fn new(now_millis: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_millis)),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now_millis: u64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(second >= first);
        // Sanity check: after 2020-01-01
        assert!(first > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();

        handle.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);

        handle.set(10);
        assert_eq!(clock.now_millis(), 10);
    }
}
