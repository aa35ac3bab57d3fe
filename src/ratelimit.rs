use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed-window request counter, local to one process.
///
/// Best-effort throttling only: every instance keeps its own counters and they
/// reset on restart. Nothing that must hold across instances may rely on it.
#[derive(Debug)]
pub struct LocalRateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl LocalRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, at: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // drop expired windows so the map does not grow without bound
        if windows.len() > 10_000 {
            let window = self.window;
            windows.retain(|_, (started, _)| at.duration_since(*started) < window);
        }
        let entry = windows.entry(key.to_string()).or_insert((at, 0));
        if at.duration_since(entry.0) >= self.window {
            *entry = (at, 0);
        }
        if entry.1 >= self.limit {
            return false;
        }
        entry.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window() {
        let limiter = LocalRateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("u1", start));
        assert!(limiter.check_at("u1", start));
        assert!(!limiter.check_at("u1", start + Duration::from_secs(1)));
        assert!(limiter.check_at("u2", start));
        assert!(limiter.check_at("u1", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_zero_disables() {
        let limiter = LocalRateLimiter::per_minute(0);
        for _ in 0..100 {
            assert!(limiter.check("u1"));
        }
    }
}
