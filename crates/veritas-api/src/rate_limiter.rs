//! Fixed-window rate limiting, keyed by agent id or client id.
//!
//! Each key gets its own window: a request count and the window's start
//! time. When the window elapses the count resets. No background sweep
//! thread is needed — stale entries are evicted lazily the next time the
//! same key is checked, and a periodic `sweep` is exposed for callers that
//! want to bound memory for keys that never come back.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let max_requests = std::env::var("VERITAS_RATE_LIMIT_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let window_secs = std::env::var("VERITAS_RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

struct Window {
    count: u32,
    started_at: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: RwLock<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `Ok(())` if `key` is within quota for the current window, or
    /// `Err(retry_after_secs)` if it is over quota.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();

        {
            let windows = self.windows.read().expect("rate limiter lock poisoned");
            if let Some(window) = windows.get(key) {
                if now.duration_since(window.started_at) < self.config.window {
                    if window.count >= self.config.max_requests {
                        let remaining = self.config.window - now.duration_since(window.started_at);
                        return Err(remaining.as_secs().max(1));
                    }
                } else {
                    // Window has elapsed; fall through to the write path to reset it.
                }
            } else {
                drop(windows);
                let mut windows = self.windows.write().expect("rate limiter lock poisoned");
                windows.entry(key.to_string()).or_insert(Window {
                    count: 0,
                    started_at: now,
                });
                return self.check(key);
            }
        }

        let mut windows = self.windows.write().expect("rate limiter lock poisoned");
        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });

        if now.duration_since(window.started_at) >= self.config.window {
            window.count = 0;
            window.started_at = now;
        }

        if window.count >= self.config.max_requests {
            let remaining = self.config.window - now.duration_since(window.started_at);
            return Err(remaining.as_secs().max(1));
        }

        window.count += 1;
        Ok(())
    }

    /// Drop windows that have long since elapsed, bounding memory use for
    /// keys that stop sending requests.
    pub fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.config.window * 4;
        let mut windows = self.windows.write().expect("rate limiter lock poisoned");
        windows.retain(|_, w| now.duration_since(w.started_at) < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_quota() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 3,
            window: Duration::from_secs(60),
        });
        assert!(limiter.check("agent-1").is_ok());
        assert!(limiter.check("agent-1").is_ok());
        assert!(limiter.check("agent-1").is_ok());
    }

    #[test]
    fn blocks_once_quota_is_exhausted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(60),
        });
        assert!(limiter.check("agent-1").is_ok());
        assert!(limiter.check("agent-1").is_ok());
        assert!(limiter.check("agent-1").is_err());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
        });
        assert!(limiter.check("agent-1").is_ok());
        assert!(limiter.check("agent-1").is_err());
        assert!(limiter.check("agent-2").is_ok());
    }

    #[test]
    fn sweep_evicts_stale_windows() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(1),
        });
        limiter.check("agent-1").ok();
        std::thread::sleep(Duration::from_millis(10));
        limiter.sweep();
        assert!(limiter.windows.read().unwrap().is_empty());
    }
}
