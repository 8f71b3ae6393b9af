use std::time::Instant;

use dashmap::DashMap;

/// Token buckets keyed by API key or client IP. Buckets are created on
/// first use and retained for the process lifetime; there is no eviction.
#[derive(Debug, Default)]
pub struct RateLimiterMap {
    buckets: DashMap<String, TokenBucket>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits `limit` requests per 60 seconds at steady rate with burst
    /// equal to `limit`. Callers handle `limit == 0` (unlimited) before
    /// reaching the bucket.
    pub fn allow(&self, key: &str, limit: u32) -> bool {
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: limit as f64,
                last: Instant::now(),
            });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.last = now;
        bucket.tokens = (bucket.tokens + elapsed * limit as f64 / 60.0).min(limit as f64);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
