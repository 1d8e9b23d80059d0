//! Fixed-window per-identity rate limiting

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Fixed-window counter keyed by identity
///
/// Windows reset lazily on the next check after expiry; stale keys are
/// dropped during resets, so the map stays proportional to active callers.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowSlot>>,
}

struct WindowSlot {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    /// Limiter allowing `limit` hits per `window` per key
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one hit for the key; false when the key is over budget
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        let slot = windows.entry(key.to_string()).or_insert(WindowSlot {
            started: now,
            count: 0,
        });

        if now.duration_since(slot.started) >= self.window {
            slot.started = now;
            slot.count = 0;
        }

        if slot.count >= self.limit {
            return false;
        }

        slot.count += 1;
        true
    }

    /// Drop windows that expired before `now`; called from the reaper sweep
    pub fn compact(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .retain(|_, slot| now.duration_since(slot.started) < self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
        assert!(limiter.check("bob"));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("alice"));
    }

    #[test]
    fn test_compact_drops_expired_windows() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.check("alice");

        std::thread::sleep(Duration::from_millis(20));
        limiter.compact();
        assert!(limiter.windows.lock().is_empty());
    }
}
