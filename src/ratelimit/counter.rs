//! Fixed-window counter records and the window transition rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default quota per window.
pub const DEFAULT_MAX: u64 = 2500;
/// Default window length.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(60 * 60);

/// A quota: at most `max` requests per `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests granted per window
    pub max: u64,
    /// Window length
    pub duration: Duration,
}

impl Quota {
    /// Create a new quota.
    pub fn new(max: u64, duration: Duration) -> Self {
        Self { max, duration }
    }

    /// Window length in milliseconds.
    pub fn duration_millis(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            duration: DEFAULT_DURATION,
        }
    }
}

/// Window state for one identity.
///
/// `remaining` is the number of requests the window still grants, counting
/// the request that produced this record. A record with `remaining == 0`
/// admits nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// The identity this record tracks
    pub identity: String,
    /// Quota ceiling in effect when the window opened
    pub total: u64,
    /// Requests left in this window, in `[0, total]`
    pub remaining: u64,
    /// End of the window, epoch milliseconds
    pub reset: u64,
}

impl CounterRecord {
    /// Open a fresh window starting at `now`.
    pub fn open(identity: &str, quota: Quota, now: u64) -> Self {
        Self {
            identity: identity.to_string(),
            total: quota.max,
            remaining: quota.max,
            reset: now.saturating_add(quota.duration_millis()),
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset <= now
    }

    /// Whether the request that produced this record is admitted.
    pub fn admits(&self) -> bool {
        self.remaining > 0
    }

    /// Requests still available after the current one is counted.
    pub fn remaining_after(&self) -> u64 {
        self.remaining.saturating_sub(1)
    }

    /// Time left until the window resets, zero once it has passed.
    pub fn retry_after(&self, now: u64) -> Duration {
        Duration::from_millis(self.reset.saturating_sub(now))
    }

    /// Reset time in epoch seconds, rounded up.
    pub fn reset_secs(&self) -> u64 {
        self.reset.div_ceil(1000)
    }
}

/// Apply one request to an identity's window.
///
/// With no record, or an expired one, a fresh window is opened and returned
/// undecremented: that request is the first of the window. Otherwise
/// `remaining` is decremented, saturating at zero, and `total` and `reset` are
/// carried over. Every store must produce exactly this transition.
pub fn advance(
    existing: Option<&CounterRecord>,
    identity: &str,
    quota: Quota,
    now: u64,
) -> CounterRecord {
    match existing {
        Some(record) if !record.is_expired(now) => CounterRecord {
            remaining: record.remaining.saturating_sub(1),
            ..record.clone()
        },
        _ => CounterRecord::open(identity, quota, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(max: u64, millis: u64) -> Quota {
        Quota::new(max, Duration::from_millis(millis))
    }

    #[test]
    fn test_default_quota() {
        let quota = Quota::default();
        assert_eq!(quota.max, 2500);
        assert_eq!(quota.duration, Duration::from_secs(3600));
    }

    #[test]
    fn test_first_request_opens_window() {
        let record = advance(None, "1.2.3.4", quota(3, 1000), 500);

        assert_eq!(record.identity, "1.2.3.4");
        assert_eq!(record.total, 3);
        assert_eq!(record.remaining, 3);
        assert_eq!(record.reset, 1500);
        assert!(record.admits());
        assert_eq!(record.remaining_after(), 2);
    }

    #[test]
    fn test_requests_within_window_count_down() {
        let q = quota(3, 1000);
        let mut record = advance(None, "id", q, 0);
        let mut exposed = vec![record.remaining_after()];
        let mut admitted = 1;

        for now in 1..=3 {
            record = advance(Some(&record), "id", q, now);
            exposed.push(record.remaining_after());
            if record.admits() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 3);
        assert_eq!(exposed, vec![2, 1, 0, 0]);
        assert_eq!(record.remaining, 0);
        assert_eq!(record.reset, 1000);
    }

    #[test]
    fn test_remaining_never_goes_negative() {
        let q = quota(1, 1000);
        let mut record = advance(None, "id", q, 0);
        for now in 1..10 {
            record = advance(Some(&record), "id", q, now);
            assert_eq!(record.remaining, 0);
            assert!(!record.admits());
        }
    }

    #[test]
    fn test_expired_window_is_replaced() {
        let q = quota(2, 1000);
        let mut record = advance(None, "id", q, 0);
        record = advance(Some(&record), "id", q, 10);
        record = advance(Some(&record), "id", q, 20);
        assert!(!record.admits());

        // Window ends at exactly 1000
        let record = advance(Some(&record), "id", q, 1000);
        assert_eq!(record.remaining, 2);
        assert_eq!(record.reset, 2000);
    }

    #[test]
    fn test_zero_max_never_admits() {
        let q = quota(0, 1000);
        let record = advance(None, "id", q, 0);
        assert!(!record.admits());
        let record = advance(Some(&record), "id", q, 1);
        assert!(!record.admits());
        assert_eq!(record.remaining_after(), 0);
    }

    #[test]
    fn test_total_is_kept_from_window_creation() {
        let record = advance(None, "id", quota(5, 1000), 0);
        let record = advance(Some(&record), "id", quota(50, 1000), 1);
        assert_eq!(record.total, 5);
        assert_eq!(record.remaining, 4);
    }

    #[test]
    fn test_retry_after_and_reset_secs() {
        let record = advance(None, "id", quota(1, 1000), 1);
        assert_eq!(record.retry_after(1), Duration::from_millis(1000));
        assert_eq!(record.retry_after(5000), Duration::ZERO);
        assert_eq!(record.reset_secs(), 2);
    }
}
