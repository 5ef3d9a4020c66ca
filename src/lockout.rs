//! Failed-login lockout counter.
//!
//! Five recorded failures lock a key out for fifteen minutes measured from
//! the last failure. This is a UX throttle, not a security boundary: it only
//! slows down someone hammering the login form through this process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub const MAX_FAILURES: usize = 5;
pub const LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Default)]
struct FailureState {
    count: usize,
    last_failure: Option<Instant>,
}

/// Per-key (client IP) failure bookkeeping.
#[derive(Clone, Default)]
pub struct LoginLockout {
    store: Arc<DashMap<String, FailureState>>,
}

impl LoginLockout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, key: &str) {
        self.record_failure_at(key, Instant::now());
    }

    /// Instant-parameterized variant so tests can drive a fake clock.
    pub fn record_failure_at(&self, key: &str, now: Instant) {
        let mut entry = self.store.entry(key.to_string()).or_default();
        // A failure after the window expired starts a fresh count.
        if let Some(last) = entry.last_failure {
            if now.duration_since(last) >= LOCKOUT_WINDOW {
                entry.count = 0;
            }
        }
        entry.count += 1;
        entry.last_failure = Some(now);
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        self.is_blocked_at(key, Instant::now())
    }

    /// Blocked when the threshold is reached and the window, measured from
    /// the last failure, has not yet elapsed.
    pub fn is_blocked_at(&self, key: &str, now: Instant) -> bool {
        let Some(entry) = self.store.get(key) else { return false };
        if entry.count < MAX_FAILURES {
            return false;
        }
        match entry.last_failure {
            Some(last) => now.duration_since(last) < LOCKOUT_WINDOW,
            None => false,
        }
    }

    /// Seconds until the key unblocks, for the error message.
    pub fn retry_after_at(&self, key: &str, now: Instant) -> Option<u64> {
        let entry = self.store.get(key)?;
        if entry.count < MAX_FAILURES {
            return None;
        }
        let last = entry.last_failure?;
        let elapsed = now.duration_since(last);
        (elapsed < LOCKOUT_WINDOW).then(|| (LOCKOUT_WINDOW - elapsed).as_secs())
    }

    /// Successful login resets the counter.
    pub fn clear(&self, key: &str) {
        self.store.remove(key);
    }
}
