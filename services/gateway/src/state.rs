use crate::rate_limit::RateLimiter;
use market_data::MarketDataFeed;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// The one feed (and broker session) of this process.
    pub feed: Arc<MarketDataFeed>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(feed: Arc<MarketDataFeed>) -> Self {
        Self {
            feed,
            rate_limiter: Arc::new(RateLimiter::new()),
        }
    }
}
