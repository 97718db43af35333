//! Observability and metrics for the market-data feed
//!
//! Counters for the live path (ticks, subscribers, subscriptions) and the
//! query path (cache, breaker, backpressure, cascade), plus a bounded
//! broadcast-latency window. Exported as a flat map for `GET /metrics`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the feed.
pub struct FeedMetrics {
    // Live path
    pub ticks_broadcast: AtomicU64,
    pub heartbeats_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub subscribers: AtomicU64,
    pub broadcast_latency_ns: Mutex<LatencyTracker>,

    // Upstream subscriptions
    pub subscriptions_issued: AtomicU64,
    pub subscription_failures: AtomicU64,

    // Query path
    pub queries: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub breaker_rejections: AtomicU64,
    pub backpressure_rejections: AtomicU64,
    pub degraded_results: AtomicU64,

    // Cascade
    pub cascade_runs: AtomicU64,
    pub provider_failures: AtomicU64,
    pub provider_skips: AtomicU64,
    pub mock_records: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self {
            ticks_broadcast: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            subscribers: AtomicU64::new(0),
            broadcast_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            subscriptions_issued: AtomicU64::new(0),
            subscription_failures: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            breaker_rejections: AtomicU64::new(0),
            backpressure_rejections: AtomicU64::new(0),
            degraded_results: AtomicU64::new(0),
            cascade_runs: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            provider_skips: AtomicU64::new(0),
            mock_records: AtomicU64::new(0),
        }
    }

    /// Record one broadcast and how long serialization plus sends took.
    pub fn record_broadcast(&self, heartbeat: bool, latency_ns: u64) {
        if heartbeat {
            self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ticks_broadcast.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut tracker) = self.broadcast_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscribers(&self, count: u64) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    pub fn record_subscription(&self, ok: bool) {
        if ok {
            self.subscriptions_issued.fetch_add(1, Ordering::Relaxed);
        } else {
            self.subscription_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_breaker_rejection(&self) {
        self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure_rejection(&self) {
        self.backpressure_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded(&self) {
        self.degraded_results.fetch_add(1, Ordering::Relaxed);
    }

    /// `provider_skips` counts stages passed over because their circuit was
    /// open.
    pub fn record_cascade_run(&self, provider_failures: u64, provider_skips: u64, mock_records: u64) {
        self.cascade_runs.fetch_add(1, Ordering::Relaxed);
        self.provider_failures.fetch_add(provider_failures, Ordering::Relaxed);
        self.provider_skips.fetch_add(provider_skips, Ordering::Relaxed);
        self.mock_records.fetch_add(mock_records, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        let counters = [
            ("ticks_broadcast", &self.ticks_broadcast),
            ("heartbeats_sent", &self.heartbeats_sent),
            ("send_failures", &self.send_failures),
            ("subscribers", &self.subscribers),
            ("subscriptions_issued", &self.subscriptions_issued),
            ("subscription_failures", &self.subscription_failures),
            ("queries", &self.queries),
            ("cache_hits", &self.cache_hits),
            ("cache_misses", &self.cache_misses),
            ("breaker_rejections", &self.breaker_rejections),
            ("backpressure_rejections", &self.backpressure_rejections),
            ("degraded_results", &self.degraded_results),
            ("cascade_runs", &self.cascade_runs),
            ("provider_failures", &self.provider_failures),
            ("provider_skips", &self.provider_skips),
            ("mock_records", &self.mock_records),
        ];
        for (name, counter) in counters {
            m.insert(name.to_string(), counter.load(Ordering::Relaxed));
        }
        if let Ok(tracker) = self.broadcast_latency_ns.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("broadcast_latency_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for FeedMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
