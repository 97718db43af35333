use crate::error::AppError;
use dashmap::DashMap;
use std::time::Instant;

/// Token-bucket shape of one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointLimit {
    pub capacity: u32,
    /// Tokens per second.
    pub refill_rate: f64,
}

pub const SUBSCRIBE_LIMIT: EndpointLimit = EndpointLimit { capacity: 20, refill_rate: 5.0 };
pub const QUERY_LIMIT: EndpointLimit = EndpointLimit { capacity: 60, refill_rate: 30.0 };
pub const SYNC_LIMIT: EndpointLimit = EndpointLimit { capacity: 5, refill_rate: 0.1 };
pub const WS_LIMIT: EndpointLimit = EndpointLimit { capacity: 10, refill_rate: 10.0 };

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(limit: EndpointLimit) -> Self {
        Self {
            capacity: limit.capacity,
            tokens: limit.capacity as f64,
            refill_rate: limit.refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = f64::min(self.capacity as f64, self.tokens + elapsed * self.refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-endpoint token buckets.
pub struct RateLimiter {
    buckets: DashMap<&'static str, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: DashMap::new() }
    }

    pub fn check(&self, endpoint: &'static str, limit: EndpointLimit) -> Result<(), AppError> {
        let mut bucket = self.buckets.entry(endpoint).or_insert_with(|| Bucket::new(limit));
        if bucket.allow_request(Instant::now()) {
            Ok(())
        } else {
            tracing::warn!(endpoint, "Rate limit exceeded");
            Err(AppError::RateLimitExceeded(format!("Rate limit for {endpoint}")))
        }
    }
}
