//! Resilient query path
//!
//! [`ResilientQueryGateway`] answers "current data for these symbols" by
//! composing a TTL cache, a circuit breaker and an in-flight limit around
//! the store read, falling back to a reduced-scope read and, for symbols
//! the store does not have, to the provider cascade. Callers always get a
//! [`MarketDataResult`]; failures are reported in `data_source`/`error`.

pub mod breaker;
pub mod cache;
pub mod gateway;
pub mod limiter;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use types::market::MarketQuote;

use crate::clock::elapsed_between;

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use cache::{CacheKey, ResultCache};
pub use gateway::ResilientQueryGateway;
pub use limiter::ConcurrencyLimiter;

/// Where the rows of a result came from, or why there are none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Store,
    Cascade,
    /// Partly store, partly cascade.
    Mixed,
    ReducedFallback,
    CircuitBreaker,
    TooManyRequests,
    Error,
}

impl DataSource {
    pub fn is_degraded(&self) -> bool {
        matches!(self, DataSource::CircuitBreaker | DataSource::TooManyRequests | DataSource::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    NoData,
}

/// Rows younger than this count as fresh for quality scoring.
const QUALITY_FRESH_WINDOW: Duration = Duration::from_secs(60 * 60);

impl DataQuality {
    /// Weighted score: 0.4 priced, 0.2 volume, 0.2 timestamped, 0.2 fresh.
    pub fn assess(data: &[MarketQuote], now: DateTime<Utc>) -> Self {
        if data.is_empty() {
            return DataQuality::NoData;
        }
        let total = data.len() as f64;
        let ratio = |pred: &dyn Fn(&MarketQuote) -> bool| data.iter().filter(|q| pred(q)).count() as f64 / total;

        let priced = ratio(&|q| q.price.is_sign_positive() && !q.price.is_zero());
        let with_volume = ratio(&|q| q.volume.is_some_and(|v| v > 0));
        let timestamped = ratio(&|q| q.timestamp.timestamp() > 0);
        let fresh = ratio(&|q| elapsed_between(q.timestamp, now) < QUALITY_FRESH_WINDOW);

        let score = priced * 0.4 + with_volume * 0.2 + timestamped * 0.2 + fresh * 0.2;
        if score >= 0.9 {
            DataQuality::Excellent
        } else if score >= 0.7 {
            DataQuality::Good
        } else if score >= 0.5 {
            DataQuality::Fair
        } else {
            DataQuality::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDataResult {
    pub data: Vec<MarketQuote>,
    pub data_source: DataSource,
    pub last_update: Option<DateTime<Utc>>,
    pub is_fresh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Percentage of requested symbols present in `data`.
    pub coverage: f64,
    pub quality: DataQuality,
    pub from_cache: bool,
}

impl MarketDataResult {
    pub fn degraded(data_source: DataSource, error: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            data_source,
            last_update: None,
            is_fresh: false,
            error: Some(error.into()),
            warning: None,
            coverage: 0.0,
            quality: DataQuality::NoData,
            from_cache: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::quote_at;

    #[test]
    fn test_quality_excellent_for_fresh_complete_rows() {
        let now = DateTime::from_timestamp_millis(10_000).unwrap();
        let data = vec![quote_at("AAPL", 9_000, "190"), quote_at("MSFT", 9_500, "410")];
        assert_eq!(DataQuality::assess(&data, now), DataQuality::Excellent);
    }

    #[test]
    fn test_quality_degrades_with_stale_rows_without_volume() {
        let now = DateTime::from_timestamp(10 * 3600, 0).unwrap();
        let mut stale = quote_at("AAPL", 1_000, "190");
        stale.volume = None;
        // 0.4 price + 0.2 timestamp
        assert_eq!(DataQuality::assess(&[stale], now), DataQuality::Fair);
    }

    #[test]
    fn test_quality_no_data() {
        assert_eq!(DataQuality::assess(&[], Utc::now()), DataQuality::NoData);
    }

    #[test]
    fn test_degraded_result_shape() {
        let result = MarketDataResult::degraded(DataSource::CircuitBreaker, "open");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["dataSource"], "circuit_breaker");
        assert_eq!(json["error"], "open");
        assert!(result.data_source.is_degraded());
    }
}
