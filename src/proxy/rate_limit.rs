//! Keyed token-bucket rate limiting
//!
//! One bucket per API key (or client IP when the request carries no key). A
//! limit of `N` permits N requests per 60 seconds at steady rate with a burst
//! of N; a limit of 0 means unlimited. Buckets are created on first use and
//! retained for the process lifetime - there is no eviction, which keeps the
//! observed semantics of the original but lets the map grow with distinct
//! callers.

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Instant;

const WINDOW_SECS: f64 = 60.0;

/// Classic token bucket: capacity = burst = the per-minute limit.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: u32, now: Instant) -> Self {
        Self {
            capacity: limit as f64,
            tokens: limit as f64,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity / WINDOW_SECS).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Concurrent bucket map keyed by api-key-or-ip.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Whether one request under `key` fits inside `limit` per minute.
    pub fn check(&self, key: &str, limit: u32) -> bool {
        self.check_at(key, limit, Instant::now())
    }

    fn check_at(&self, key: &str, limit: u32, now: Instant) -> bool {
        if limit == 0 {
            return true;
        }

        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(TokenBucket::new(limit, now)));

        let mut bucket = entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // An admin-side limit change replaces the bucket
        if bucket.capacity != limit as f64 {
            *bucket = TokenBucket::new(limit, now);
        }
        bucket.try_acquire(now)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
