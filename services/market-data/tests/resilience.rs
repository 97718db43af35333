//! Query-path resilience
//!
//! Drives `ResilientQueryGateway` against a store whose read path can be
//! broken, hung or gated:
//! - breaker opens after three failures and fails fast until cooldown
//! - exactly one trial request after cooldown
//! - TTL cache hit within 60s, fresh call afterwards
//! - timeout, single retry, reduced-scope fallback
//! - in-flight limit fails fast
//! - cascade fills symbols the store lacks

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{clock, quote, ReadMode, ScriptedStore, T0_MILLIS};
use market_data::cascade::{DeterministicFallback, ProviderCascade};
use market_data::clock::ManualClock;
use market_data::config::{FreshnessConfig, ProviderBreakerConfig, QueryConfig};
use market_data::freshness::FreshnessCheck;
use market_data::metrics::FeedMetrics;
use market_data::query::{BreakerState, DataSource, ResilientQueryGateway};
use market_data::recorder::SyncJobRecorder;
use market_data::store::QuoteStore;
use types::sync::SyncJobType;

struct Harness {
    gateway: Arc<ResilientQueryGateway>,
    store: Arc<ScriptedStore>,
    clock: Arc<ManualClock>,
    metrics: Arc<FeedMetrics>,
}

fn harness(mode: ReadMode, with_cascade: bool) -> Harness {
    let store = ScriptedStore::new(mode);
    let clock = clock();
    let metrics = Arc::new(FeedMetrics::new());
    let cascade = with_cascade.then(|| {
        let recorder = SyncJobRecorder::new(store.clone(), clock.clone(), Duration::from_secs(5));
        Arc::new(ProviderCascade::new(
            Vec::new(),
            Some(DeterministicFallback::new(clock.clone())),
            ProviderBreakerConfig::default(),
            clock.clone(),
            store.clone(),
            recorder,
            metrics.clone(),
        ))
    });
    let freshness = FreshnessCheck::new(FreshnessConfig::default(), store.clone(), clock.clone());
    let gateway = Arc::new(ResilientQueryGateway::new(
        QueryConfig::default(),
        store.clone(),
        freshness,
        cascade,
        clock.clone(),
        metrics.clone(),
    ));
    Harness { gateway, store, clock, metrics }
}

async fn seed(store: &ScriptedStore, rows: &[(&str, i64)]) {
    let quotes: Vec<_> = rows.iter().map(|(s, at)| quote(s, *at, "100.25")).collect();
    store.upsert_quotes(&quotes).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_three_failures() {
    let h = harness(ReadMode::Unreachable, false);

    for _ in 0..3 {
        let result = h.gateway.get_market_data(&["AAPL", "MSFT"], "quotes").await;
        assert_eq!(result.data_source, DataSource::Error);
        assert!(result.data.is_empty());
        assert!(result.error.is_some());
    }
    // One retry per query.
    assert_eq!(h.store.calls(), 6);
    assert!(h.gateway.breaker_snapshot().is_open());

    let rejected = h.gateway.get_market_data(&["AAPL", "MSFT"], "quotes").await;
    assert_eq!(rejected.data_source, DataSource::CircuitBreaker);
    assert_eq!(rejected.error.as_deref(), Some("open"));
    assert_eq!(h.store.calls(), 6);

    h.clock.advance(Duration::from_secs(29));
    let still_open = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    assert_eq!(still_open.data_source, DataSource::CircuitBreaker);
    assert_eq!(h.store.calls(), 6);

    h.clock.advance(Duration::from_secs(1));
    h.store.set_mode(ReadMode::Healthy);
    seed(&h.store, &[("AAPL", T0_MILLIS + 29_000)]).await;

    let trial = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    assert_eq!(trial.data_source, DataSource::Store);
    assert_eq!(trial.data.len(), 1);
    let breaker = h.gateway.breaker_snapshot();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.failure_count(), 0);
    assert_eq!(h.metrics.export()["breaker_rejections"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_breaker() {
    let h = harness(ReadMode::Unreachable, false);
    for _ in 0..3 {
        h.gateway.get_market_data(&["AAPL"], "quotes").await;
    }
    h.clock.advance(Duration::from_secs(30));

    let trial = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    assert_eq!(trial.data_source, DataSource::Error);
    assert_eq!(h.store.calls(), 8);

    let next = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    assert_eq!(next.data_source, DataSource::CircuitBreaker);
    assert_eq!(h.store.calls(), 8);
}

#[tokio::test]
async fn test_store_unreachable_returns_structured_result() {
    let h = harness(ReadMode::Unreachable, true);
    let result = h.gateway.get_market_data(&["AAPL", "MSFT"], "quotes").await;

    assert!(result.data.is_empty());
    assert!(matches!(result.data_source, DataSource::Error | DataSource::CircuitBreaker));
    assert!(result.error.is_some());
    // The cascade fills gaps in a readable store, not outages.
    assert!(h.store.inner.sync_jobs().is_empty());
}

#[tokio::test]
async fn test_identical_query_hits_cache_within_ttl() {
    let h = harness(ReadMode::Healthy, false);
    seed(&h.store, &[("AAPL", T0_MILLIS - 60_000), ("MSFT", T0_MILLIS - 60_000)]).await;

    let first = h.gateway.get_market_data(&["AAPL", "MSFT"], "quotes").await;
    assert_eq!(first.data_source, DataSource::Store);
    assert!(!first.from_cache);
    assert_eq!(h.store.calls(), 1);

    // Same set in another order and case.
    let second = h.gateway.get_market_data(&["msft", "AAPL"], "quotes").await;
    assert!(second.from_cache);
    assert_eq!(second.data, first.data);
    assert_eq!(h.store.calls(), 1);

    let other_source = h.gateway.get_market_data(&["AAPL", "MSFT"], "history").await;
    assert!(!other_source.from_cache);
    assert_eq!(h.store.calls(), 2);

    h.clock.advance(Duration::from_secs(60));
    let third = h.gateway.get_market_data(&["AAPL", "MSFT"], "quotes").await;
    assert!(!third.from_cache);
    assert_eq!(h.store.calls(), 3);
    assert_eq!(h.metrics.export()["cache_hits"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_once_then_reduced_fallback() {
    let h = harness(ReadMode::Hanging, false);
    seed(&h.store, &[("AAPL", T0_MILLIS - 1_000), ("TSLA", T0_MILLIS - 2_000)]).await;

    let started = tokio::time::Instant::now();
    let result = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    let elapsed = started.elapsed();

    assert_eq!(result.data_source, DataSource::ReducedFallback);
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].symbol.as_str(), "AAPL");
    assert_eq!(h.store.calls(), 2);
    // 8s attempt, 1s backoff, 8s attempt.
    assert!(elapsed >= Duration::from_secs(17), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(18), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_in_flight_limit_fails_fast() {
    let h = harness(ReadMode::Gated, false);
    seed(&h.store, &[("AAPL", T0_MILLIS - 1_000)]).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let gateway = h.gateway.clone();
        handles.push(tokio::spawn(async move { gateway.get_market_data(&["AAPL"], "quotes").await }));
    }
    while h.store.calls() < 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.gateway.in_flight(), 3);

    let rejected = h.gateway.get_market_data(&["AAPL"], "quotes").await;
    assert_eq!(rejected.data_source, DataSource::TooManyRequests);
    assert!(rejected.error.is_some());
    assert_eq!(h.store.calls(), 3);

    h.store.gate.add_permits(3);
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.data_source, DataSource::Store);
    }
    assert_eq!(h.gateway.in_flight(), 0);
    assert_eq!(h.metrics.export()["backpressure_rejections"], 1);
}

#[tokio::test]
async fn test_cascade_fills_missing_symbols() {
    let h = harness(ReadMode::Healthy, true);
    seed(&h.store, &[("AAPL", T0_MILLIS - 1_000)]).await;

    let result = h.gateway.get_market_data(&["AAPL", "ZZZ"], "quotes").await;
    assert_eq!(result.data_source, DataSource::Mixed);
    assert_eq!(result.coverage, 100.0);
    let symbols: Vec<&str> = result.data.iter().map(|q| q.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "ZZZ"]);
    assert!(!result.data[0].is_mock_data);
    assert!(result.data[1].is_mock_data);
    assert!(result.warning.is_some());

    let jobs = h.store.inner.sync_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, SyncJobType::QueryFill);
    assert_eq!(h.store.inner.quote_count(), 2);
}

#[tokio::test]
async fn test_empty_request_uses_default_symbols() {
    let h = harness(ReadMode::Healthy, true);
    let empty: [&str; 0] = [];
    let result = h.gateway.get_market_data(&empty, "quotes").await;

    assert_eq!(result.data_source, DataSource::Cascade);
    let symbols: Vec<&str> = result.data.iter().map(|q| q.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA"]);
}
