//! `get_market_data` with cache, breaker, limiter, retry and fallbacks

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use types::errors::FeedError;
use types::market::{MarketQuote, Symbol};
use types::sync::SyncJobType;

use super::breaker::{Admission, CircuitBreaker};
use super::cache::{CacheKey, ResultCache};
use super::limiter::ConcurrencyLimiter;
use super::{DataQuality, DataSource, MarketDataResult};
use crate::cascade::ProviderCascade;
use crate::clock::{elapsed_between, Clock};
use crate::config::QueryConfig;
use crate::freshness::{FreshnessCheck, FreshnessReport};
use crate::metrics::FeedMetrics;
use crate::store::QuoteStore;

/// Rows from the store plus the verdict on how current they are.
struct StoreRead {
    rows: Vec<MarketQuote>,
    freshness: Option<FreshnessReport>,
    source: DataSource,
}

pub struct ResilientQueryGateway {
    config: QueryConfig,
    store: Arc<dyn QuoteStore>,
    freshness: FreshnessCheck,
    cascade: Option<Arc<ProviderCascade>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FeedMetrics>,
    breaker: Mutex<CircuitBreaker>,
    limiter: ConcurrencyLimiter,
    cache: ResultCache<MarketDataResult>,
}

/// Gives an unresolved probe slot back if the call is abandoned early.
struct ProbeSlot<'a> {
    breaker: &'a Mutex<CircuitBreaker>,
    armed: bool,
}

impl ProbeSlot<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release_probe();
        }
    }
}

impl ResilientQueryGateway {
    pub fn new(
        config: QueryConfig,
        store: Arc<dyn QuoteStore>,
        freshness: FreshnessCheck,
        cascade: Option<Arc<ProviderCascade>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        Self {
            breaker: Mutex::new(CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown)),
            limiter: ConcurrencyLimiter::new(config.max_in_flight),
            cache: ResultCache::new(config.cache_ttl, config.cache_max_entries),
            config,
            store,
            freshness,
            cascade,
            clock,
            metrics,
        }
    }

    /// Current data for `symbols`. Never fails; degraded outcomes are
    /// reported through `data_source` and `error`.
    pub async fn get_market_data<S: AsRef<str>>(&self, symbols: &[S], source: &str) -> MarketDataResult {
        self.metrics.record_query();
        let symbols = self.sanitize(symbols);
        let key = CacheKey::new(&symbols, source);

        if let Some(mut hit) = self.cache.get(&key, self.clock.now()) {
            self.metrics.record_cache(true);
            debug!(symbols = symbols.len(), source, "Query served from cache");
            hit.from_cache = true;
            return hit;
        }
        self.metrics.record_cache(false);

        let admission = self.breaker().admit(self.clock.now());
        if admission == Admission::Rejected {
            self.metrics.record_breaker_rejection();
            debug!(source, "Circuit breaker open, failing fast");
            return MarketDataResult::degraded(DataSource::CircuitBreaker, FeedError::CircuitOpen.to_string());
        }
        let mut probe = ProbeSlot {
            breaker: &self.breaker,
            armed: admission == Admission::Probe,
        };

        let Some(_permit) = self.limiter.try_acquire() else {
            self.metrics.record_backpressure_rejection();
            let limit = self.limiter.max();
            warn!(limit, "Too many concurrent market-data requests");
            return MarketDataResult::degraded(
                DataSource::TooManyRequests,
                FeedError::Backpressure { limit }.to_string(),
            );
        };

        let outcome = self.fetch(&symbols).await;
        probe.disarm();
        match outcome {
            Ok(result) => {
                self.breaker().record_success();
                if !result.data.is_empty() {
                    self.cache.insert(key, result.clone(), self.clock.now());
                }
                result
            }
            Err(err) => {
                self.breaker().record_failure(self.clock.now());
                self.metrics.record_degraded();
                warn!(%err, symbols = symbols.len(), "Market-data query failed");
                MarketDataResult::degraded(DataSource::Error, err.to_string())
            }
        }
    }

    pub fn breaker_snapshot(&self) -> CircuitBreaker {
        self.breaker().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Normalise, drop invalid and duplicate entries; fall back to the
    /// default list when nothing usable is left.
    pub fn sanitize<S: AsRef<str>>(&self, raw: &[S]) -> Vec<Symbol> {
        let mut seen = HashSet::new();
        let symbols: Vec<Symbol> = raw
            .iter()
            .filter_map(|s| Symbol::parse(s.as_ref()).ok())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        if symbols.is_empty() {
            self.config.default_symbols.clone()
        } else {
            symbols
        }
    }

    async fn fetch(&self, symbols: &[Symbol]) -> Result<MarketDataResult, FeedError> {
        let read = match self.primary_with_retry(symbols).await {
            Ok(read) => read,
            Err(err) => {
                let err = err.into_provider_error("store");
                warn!(%err, "Primary read exhausted, trying reduced-scope fallback");
                self.reduced_fallback(symbols).await.map_err(|fallback_err| {
                    FeedError::Provider {
                        provider: "store".to_string(),
                        reason: format!("{err}; fallback: {fallback_err}"),
                    }
                })?
            }
        };
        Ok(self.complete(symbols, read).await)
    }

    async fn primary_with_retry(&self, symbols: &[Symbol]) -> Result<StoreRead, FeedError> {
        let mut attempt = 0u32;
        loop {
            let err = match tokio::time::timeout(self.config.primary_timeout, self.primary(symbols)).await {
                Ok(Ok(read)) => return Ok(read),
                Ok(Err(err)) => err,
                Err(_) => FeedError::Timeout {
                    operation: "primary market-data read".to_string(),
                    after_ms: self.config.primary_timeout.as_millis() as u64,
                },
            };
            if attempt >= 1 || !err.is_transient() {
                return Err(err);
            }
            let backoff = self.backoff(attempt);
            info!(%err, backoff_ms = backoff.as_millis() as u64, "Retrying primary read");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.retry_backoff_cap)
    }

    /// Freshness verdict plus the newest row per symbol.
    async fn primary(&self, symbols: &[Symbol]) -> Result<StoreRead, FeedError> {
        let freshness = self.freshness.check().await;
        let lookback = chrono::Duration::from_std(self.config.lookback).unwrap_or(chrono::Duration::MAX);
        let since = self.clock.now() - lookback;
        let limit = symbols.len().saturating_mul(self.config.rows_per_symbol).max(1);
        let rows = self.store.latest_quotes(symbols, since, limit).await?;
        Ok(StoreRead {
            rows,
            freshness: Some(freshness),
            source: DataSource::Store,
        })
    }

    /// Most recent rows of any symbol, narrowed to the request.
    async fn reduced_fallback(&self, symbols: &[Symbol]) -> Result<StoreRead, FeedError> {
        let read = self.store.recent_quotes(self.config.reduced_limit);
        let recent = match tokio::time::timeout(self.config.primary_timeout, read).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FeedError::Timeout {
                    operation: "reduced-scope read".to_string(),
                    after_ms: self.config.primary_timeout.as_millis() as u64,
                })
            }
        };

        let wanted: HashSet<&Symbol> = symbols.iter().collect();
        let mut seen = HashSet::new();
        let rows: Vec<MarketQuote> = recent
            .into_iter()
            .filter(|q| wanted.contains(&q.symbol) && seen.insert(q.symbol.clone()))
            .collect();
        if rows.is_empty() {
            return Err(FeedError::Persistence("reduced-scope read returned no rows".to_string()));
        }
        info!(rows = rows.len(), "Served from reduced-scope fallback");
        Ok(StoreRead {
            rows,
            freshness: None,
            source: DataSource::ReducedFallback,
        })
    }

    /// Fill symbols the store lacks from the cascade and shape the result.
    async fn complete(&self, symbols: &[Symbol], read: StoreRead) -> MarketDataResult {
        let StoreRead { mut rows, freshness, mut source } = read;

        let have: HashSet<Symbol> = rows.iter().map(|q| q.symbol.clone()).collect();
        let missing: Vec<Symbol> = symbols.iter().filter(|s| !have.contains(*s)).cloned().collect();
        if source == DataSource::Store && !missing.is_empty() {
            if let Some(cascade) = &self.cascade {
                debug!(missing = missing.len(), "Store lacks symbols, running cascade");
                let report = cascade.run(&missing, SyncJobType::QueryFill).await;
                if !report.quotes.is_empty() {
                    source = if rows.is_empty() { DataSource::Cascade } else { DataSource::Mixed };
                    rows.extend(report.quotes);
                }
            }
        }

        let position = |s: &Symbol| symbols.iter().position(|x| x == s).unwrap_or(usize::MAX);
        rows.sort_by_key(|q| position(&q.symbol));

        let now = self.clock.now();
        let coverage = if symbols.is_empty() {
            0.0
        } else {
            rows.len() as f64 / symbols.len() as f64 * 100.0
        };
        let last_update = rows.iter().map(|q| q.timestamp).max();
        let is_fresh = match &freshness {
            Some(report) if source == DataSource::Store => report.is_fresh,
            _ => last_update.is_some_and(|at| elapsed_between(at, now) < self.freshness.max_age()),
        };
        let warning = if rows.iter().any(|q| q.is_mock_data) {
            Some("Synthetic data included: real providers could not resolve every symbol".to_string())
        } else if rows.is_empty() {
            Some("No data available for the requested symbols".to_string())
        } else if coverage < 100.0 {
            Some(format!("Partial data available ({coverage:.0}% coverage)"))
        } else {
            None
        };

        MarketDataResult {
            quality: DataQuality::assess(&rows, now),
            data: rows,
            data_source: source,
            last_update,
            is_fresh,
            error: None,
            warning,
            coverage,
            from_cache: false,
        }
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
