//! Fixed-window rate limiter keyed by caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_in: Duration,
}

struct Window {
    count: u32,
    resets_at: Instant,
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Briefing generation: `max` per hour.
    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(Duration::from_secs(3600), max_requests)
    }

    /// Count one request against `key`.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, w| now < w.resets_at);

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + self.window,
        });
        let reset_in = window.resets_at.saturating_duration_since(now);

        if window.count >= self.max_requests {
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_in,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            remaining: self.max_requests - window.count,
            reset_in,
        }
    }

    pub fn reset(&self, key: &str) {
        self.windows.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_after_max_requests() {
        let limiter = RateLimiter::per_hour(2);
        assert!(limiter.check("user").allowed);
        let second = limiter.check("user");
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        let third = limiter.check("user");
        assert!(!third.allowed);
        assert!(third.reset_in <= Duration::from_secs(3600));
    }

    #[test]
    fn test_keys_have_separate_windows() {
        let limiter = RateLimiter::per_hour(1);
        assert!(limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
        assert!(!limiter.check("a").allowed);
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check("k").allowed);
    }
}
