//! Per-provider circuit and call statistics
//!
//! Every HTTP stage of the cascade owns a [`ProviderCircuit`]. One request
//! is one batch call. Once `threshold` consecutive batches fail the stage is
//! skipped until the cooldown elapses; the symbols it would have seen fall
//! through to the next stage. After the cooldown a single trial batch is
//! let through, and its outcome closes or re-opens the circuit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use types::errors::FeedError;

use crate::clock::Clock;
use crate::config::ProviderBreakerConfig;
use crate::query::breaker::{Admission, BreakerState, CircuitBreaker};

#[derive(Debug, Default)]
struct ProviderStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    skipped: u64,
    latency_total: Duration,
    last_request: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct CircuitInner {
    breaker: CircuitBreaker,
    stats: ProviderStats,
}

pub struct ProviderCircuit {
    name: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl ProviderCircuit {
    pub fn new(name: impl Into<String>, config: ProviderBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            inner: Mutex::new(CircuitInner {
                breaker: CircuitBreaker::new(config.threshold, config.cooldown),
                stats: ProviderStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BreakerState {
        self.lock().breaker.state()
    }

    /// Ask to send one batch. `None` means the circuit is open and the
    /// stage should be skipped.
    pub fn admit(&self) -> Option<CallPermit<'_>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.breaker.admit(now) {
            Admission::Rejected => {
                inner.stats.skipped += 1;
                None
            }
            admission => Some(CallPermit {
                circuit: self,
                trial: admission == Admission::Probe,
                settled: false,
            }),
        }
    }

    fn settle(&self, latency: Duration, error: Option<&FeedError>) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let CircuitInner { breaker, stats } = &mut *inner;
        stats.total_requests += 1;
        stats.latency_total += latency;
        stats.last_request = Some(now);
        match error {
            None => {
                stats.successful_requests += 1;
                breaker.record_success();
            }
            Some(err) => {
                stats.failed_requests += 1;
                stats.last_error = Some(err.to_string());
                let was_open = breaker.is_open();
                breaker.record_failure(now);
                if breaker.is_open() && !was_open {
                    warn!(provider = %self.name, failures = breaker.failure_count(), "Provider circuit opened");
                }
            }
        }
    }

    pub fn status(&self) -> ProviderStatus {
        let inner = self.lock();
        let stats = &inner.stats;
        let success_rate = if stats.total_requests == 0 {
            0.0
        } else {
            stats.successful_requests as f64 * 100.0 / stats.total_requests as f64
        };
        let avg_latency_ms = stats
            .latency_total
            .as_millis()
            .checked_div(u128::from(stats.total_requests))
            .unwrap_or(0) as u64;
        ProviderStatus {
            provider: self.name.clone(),
            state: inner.breaker.state(),
            consecutive_failures: inner.breaker.failure_count(),
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            skipped: stats.skipped,
            success_rate,
            avg_latency_ms,
            last_request: stats.last_request,
            last_error: stats.last_error.clone(),
            next_attempt_at: inner.breaker.next_attempt_at(),
        }
    }
}

/// One admitted batch call. Dropping an unsettled trial permit hands the
/// trial slot back so a cancelled call cannot wedge the circuit half-open.
pub struct CallPermit<'a> {
    circuit: &'a ProviderCircuit,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeeded(mut self, latency: Duration) {
        self.settled = true;
        self.circuit.settle(latency, None);
    }

    pub fn failed(mut self, latency: Duration, error: &FeedError) {
        self.settled = true;
        self.circuit.settle(latency, Some(error));
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.circuit.lock().breaker.release_probe();
        }
    }
}

/// Snapshot of one provider for `GET /providers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Stage runs skipped while the circuit was open.
    pub skipped: u64,
    /// Percent of requests that succeeded.
    pub success_rate: f64,
    pub avg_latency_ms: u64,
    pub last_request: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// At least one provider is closed.
    Operational,
    /// Every provider is open or trialing; only the deterministic stage serves.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatusReport {
    pub overall_status: OverallStatus,
    pub providers: Vec<ProviderStatus>,
}

impl ProviderStatusReport {
    pub fn from_statuses(providers: Vec<ProviderStatus>) -> Self {
        let overall_status = if providers.iter().any(|p| p.state == BreakerState::Closed) {
            OverallStatus::Operational
        } else {
            OverallStatus::Degraded
        };
        Self { overall_status, providers }
    }
}
