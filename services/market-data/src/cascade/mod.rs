//! Provider fallback cascade
//!
//! Providers are tried in order. Each stage only sees the symbols no
//! earlier stage resolved:
//!
//! ```text
//! S ─▶ Primary ─remaining─▶ Secondary ─remaining─▶ ... ─remaining─▶ Deterministic
//!        │                     │                                       │
//!        └──────── resolved rows ──────────────────────────────────────┴─▶ upsert + SyncJobRecord
//! ```
//!
//! The deterministic stage resolves whatever reaches it, so coverage is
//! complete while it is enabled. A failing stage is logged and the cascade
//! moves on. Each HTTP stage sits behind its own [`ProviderCircuit`]; while
//! that circuit is open the stage is skipped and its input passes straight
//! to the next stage.

pub mod circuit;
pub mod deterministic;
pub mod http;
pub mod provider;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use types::errors::FeedError;
use types::market::{MarketQuote, Symbol};
use types::sync::SyncJobType;

use crate::clock::Clock;
use crate::config::ProviderBreakerConfig;
use crate::metrics::FeedMetrics;
use crate::recorder::SyncJobRecorder;
use crate::store::QuoteStore;

pub use circuit::{OverallStatus, ProviderCircuit, ProviderStatus, ProviderStatusReport};
pub use deterministic::DeterministicFallback;
pub use http::HttpQuoteProvider;
pub use provider::{fetch_guarded, fetch_in_batches, Batching, QuoteProvider};

/// What one stage was asked for and what it delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttemptResult {
    pub provider: String,
    pub requested: Vec<Symbol>,
    pub resolved: Vec<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The provider's circuit was open for some or all of the input.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub requested: Vec<Symbol>,
    pub quotes: Vec<MarketQuote>,
    pub attempts: Vec<ProviderAttemptResult>,
    /// Empty whenever the deterministic stage is enabled.
    pub unresolved: Vec<Symbol>,
    pub persisted: bool,
}

impl CascadeReport {
    pub fn mock_count(&self) -> usize {
        self.quotes.iter().filter(|q| q.is_mock_data).count()
    }
}

/// An HTTP stage and the circuit guarding it.
struct GuardedStage {
    provider: Arc<dyn QuoteProvider>,
    circuit: ProviderCircuit,
}

pub struct ProviderCascade {
    stages: Vec<GuardedStage>,
    terminal: Option<DeterministicFallback>,
    store: Arc<dyn QuoteStore>,
    recorder: SyncJobRecorder,
    metrics: Arc<FeedMetrics>,
}

impl ProviderCascade {
    pub fn new(
        providers: Vec<Arc<dyn QuoteProvider>>,
        terminal: Option<DeterministicFallback>,
        breaker: ProviderBreakerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn QuoteStore>,
        recorder: SyncJobRecorder,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        let stages = providers
            .into_iter()
            .map(|provider| GuardedStage {
                circuit: ProviderCircuit::new(provider.name(), breaker, clock.clone()),
                provider,
            })
            .collect();
        Self {
            stages,
            terminal,
            store,
            recorder,
            metrics,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stages.iter().map(|s| s.provider.name().to_string()).collect();
        if let Some(terminal) = &self.terminal {
            names.push(terminal.name().to_string());
        }
        names
    }

    pub fn recorder(&self) -> &SyncJobRecorder {
        &self.recorder
    }

    /// Circuit state and call statistics of every HTTP provider, in
    /// cascade order. The deterministic stage has no circuit.
    pub fn provider_status(&self) -> ProviderStatusReport {
        ProviderStatusReport::from_statuses(self.stages.iter().map(|s| s.circuit.status()).collect())
    }

    /// Resolve `symbols`, persist the rows and record the run.
    pub async fn run(&self, symbols: &[Symbol], job_type: SyncJobType) -> CascadeReport {
        let mut seen = HashSet::new();
        let requested: Vec<Symbol> = symbols.iter().filter(|s| seen.insert(*s)).cloned().collect();

        let mut remaining = requested.clone();
        let mut quotes = Vec::new();
        let mut attempts = Vec::new();
        let mut provider_failures = 0u64;
        let mut provider_skips = 0u64;

        let stages = self
            .stages
            .iter()
            .map(|s| (&*s.provider, Some(&s.circuit)))
            .chain(self.terminal.as_ref().map(|t| (t as &dyn QuoteProvider, None)));
        for (provider, circuit) in stages {
            if remaining.is_empty() {
                break;
            }
            let (resolved, attempt, failed) = run_stage(provider, circuit, &remaining).await;
            if attempt.skipped {
                provider_skips += 1;
            }
            if failed {
                provider_failures += 1;
            }
            remaining.retain(|s| !attempt.resolved.contains(s));
            quotes.extend(resolved);
            attempts.push(attempt);
        }

        if !remaining.is_empty() {
            warn!(unresolved = remaining.len(), "Cascade exhausted with unresolved symbols");
        }

        let persist_error = self.persist(&quotes).await.err();
        let persisted = persist_error.is_none();
        let success_count = if persisted { quotes.len() as u64 } else { 0 };
        let fail_count = remaining.len() as u64 + if persisted { 0 } else { quotes.len() as u64 };

        let contributing: Vec<&str> = attempts
            .iter()
            .filter(|a| !a.resolved.is_empty())
            .map(|a| a.provider.as_str())
            .collect();
        let source = if contributing.is_empty() {
            "none".to_string()
        } else {
            contributing.join("+")
        };
        self.recorder
            .log(job_type, &source, success_count, fail_count, persist_error.map(|e| e.to_string()))
            .await;

        let report = CascadeReport {
            requested,
            quotes,
            attempts,
            unresolved: remaining,
            persisted,
        };
        self.metrics
            .record_cascade_run(provider_failures, provider_skips, report.mock_count() as u64);
        info!(
            job_type = job_type.as_str(),
            requested = report.requested.len(),
            resolved = report.quotes.len(),
            synthetic = report.mock_count(),
            %source,
            "Cascade run complete"
        );
        report
    }

    async fn persist(&self, quotes: &[MarketQuote]) -> Result<usize, FeedError> {
        if quotes.is_empty() {
            return Ok(0);
        }
        self.store.upsert_quotes(quotes).await.map_err(|err| {
            warn!(%err, rows = quotes.len(), "Failed to persist cascade rows");
            err
        })
    }
}

/// Run one provider over `input`, keeping only first rows for symbols in
/// `input`. The flag is set when at least one batch actually failed.
async fn run_stage(
    provider: &dyn QuoteProvider,
    circuit: Option<&ProviderCircuit>,
    input: &[Symbol],
) -> (Vec<MarketQuote>, ProviderAttemptResult, bool) {
    let outcome = fetch_guarded(provider, circuit, input).await;

    let mut open: HashSet<&Symbol> = input.iter().collect();
    let resolved: Vec<MarketQuote> = outcome
        .quotes
        .into_iter()
        .filter(|q| open.remove(&q.symbol))
        .collect();

    let failed = !outcome.errors.is_empty();
    let mut errors: Vec<String> = outcome.errors.iter().map(ToString::to_string).collect();
    if outcome.skipped {
        errors.push(FeedError::CircuitOpen.to_string());
    }
    let attempt = ProviderAttemptResult {
        provider: provider.name().to_string(),
        requested: input.to_vec(),
        resolved: resolved.iter().map(|q| q.symbol.clone()).collect(),
        error: (!errors.is_empty()).then(|| errors.join("; ")),
        skipped: outcome.skipped,
    };
    (resolved, attempt, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use crate::testing::quote_at;
    use async_trait::async_trait;
    use std::time::Duration;
    use types::sync::SyncJobStatus;
    use crate::query::breaker::BreakerState;

    /// Knows a fixed set of symbols, optionally returns junk rows too.
    struct FixedProvider {
        name: &'static str,
        known: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl QuoteProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn batching(&self) -> Batching {
            Batching::new(10, Duration::ZERO)
        }

        async fn fetch_batch(&self, symbols: &[Symbol]) -> Result<Vec<MarketQuote>, FeedError> {
            if self.fail {
                return Err(FeedError::Provider { provider: self.name.into(), reason: "503".into() });
            }
            let mut rows: Vec<MarketQuote> = symbols
                .iter()
                .filter(|s| self.known.contains(&s.as_str()))
                .map(|s| quote_at(s.as_str(), 1_000, "10"))
                .collect();
            // Unrequested symbol must be discarded by the cascade.
            rows.push(quote_at("JUNK", 1_000, "1"));
            Ok(rows)
        }
    }

    fn sym(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| Symbol::parse(s).unwrap()).collect()
    }

    fn make_cascade(providers: Vec<Arc<dyn QuoteProvider>>, terminal: bool) -> (ProviderCascade, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let recorder = SyncJobRecorder::new(store.clone(), clock.clone(), Duration::from_secs(5));
        let terminal = terminal.then(|| DeterministicFallback::new(clock.clone()));
        let cascade = ProviderCascade::new(
            providers,
            terminal,
            ProviderBreakerConfig::default(),
            clock,
            store.clone(),
            recorder,
            Arc::new(FeedMetrics::new()),
        );
        (cascade, store)
    }

    #[tokio::test]
    async fn test_each_stage_sees_only_remaining() {
        let primary: Arc<dyn QuoteProvider> = Arc::new(FixedProvider { name: "primary", known: vec!["AAPL"], fail: false });
        let secondary: Arc<dyn QuoteProvider> =
            Arc::new(FixedProvider { name: "secondary", known: vec!["AAPL", "MSFT"], fail: false });
        let (cascade, store) = make_cascade(vec![primary, secondary], true);

        let report = cascade.run(&sym(&["AAPL", "MSFT", "NVDA"]), SyncJobType::ManualSync).await;

        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[0].resolved, sym(&["AAPL"]));
        assert_eq!(report.attempts[1].requested, sym(&["MSFT", "NVDA"]));
        assert_eq!(report.attempts[1].resolved, sym(&["MSFT"]));
        assert_eq!(report.attempts[2].requested, sym(&["NVDA"]));
        assert_eq!(report.attempts[2].provider, deterministic::PROVIDER_NAME);
        assert!(report.unresolved.is_empty());
        assert_eq!(report.quotes.len(), 3);
        assert_eq!(report.mock_count(), 1);
        assert_eq!(store.quote_count(), 3);

        let jobs = store.sync_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, SyncJobStatus::Completed);
        assert_eq!(jobs[0].api_source, "primary+secondary+deterministic_fallback");
        assert_eq!(jobs[0].success_count, 3);
    }

    #[tokio::test]
    async fn test_failing_stage_falls_through() {
        let broken: Arc<dyn QuoteProvider> = Arc::new(FixedProvider { name: "primary", known: vec![], fail: true });
        let (cascade, _) = make_cascade(vec![broken], true);

        let report = cascade.run(&sym(&["AAPL", "MSFT"]), SyncJobType::QueryFill).await;
        assert!(report.attempts[0].error.is_some());
        assert!(report.quotes.iter().all(|q| q.is_mock_data));
        assert_eq!(report.quotes.len(), 2);
    }

    #[tokio::test]
    async fn test_stops_once_everything_resolved() {
        let primary: Arc<dyn QuoteProvider> = Arc::new(FixedProvider { name: "primary", known: vec!["AAPL"], fail: false });
        let (cascade, _) = make_cascade(vec![primary], true);
        let report = cascade.run(&sym(&["AAPL"]), SyncJobType::QueryFill).await;
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.mock_count(), 0);
    }

    #[tokio::test]
    async fn test_without_terminal_stage_leaves_unresolved() {
        let primary: Arc<dyn QuoteProvider> = Arc::new(FixedProvider { name: "primary", known: vec!["AAPL"], fail: false });
        let (cascade, store) = make_cascade(vec![primary], false);

        let report = cascade.run(&sym(&["AAPL", "ZZZ"]), SyncJobType::QueryFill).await;
        assert_eq!(report.unresolved, sym(&["ZZZ"]));
        let jobs = store.sync_jobs();
        assert_eq!(jobs[0].status, SyncJobStatus::Partial);
        assert_eq!(jobs[0].fail_count, 1);
    }

    #[tokio::test]
    async fn test_skipped_stage_counts_as_skip_not_failure() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let metrics = Arc::new(FeedMetrics::new());
        let broken: Arc<dyn QuoteProvider> = Arc::new(FixedProvider { name: "primary", known: vec![], fail: true });
        let cascade = ProviderCascade::new(
            vec![broken],
            Some(DeterministicFallback::new(clock.clone())),
            ProviderBreakerConfig { threshold: 3, cooldown: Duration::from_secs(60) },
            clock.clone(),
            store.clone(),
            SyncJobRecorder::new(store, clock, Duration::from_secs(5)),
            metrics.clone(),
        );

        for _ in 0..4 {
            let report = cascade.run(&sym(&["AAPL"]), SyncJobType::QueryFill).await;
            assert_eq!(report.quotes.len(), 1);
        }
        let last = cascade.run(&sym(&["MSFT"]), SyncJobType::QueryFill).await;
        assert!(last.attempts[0].skipped);
        assert_eq!(last.attempts[0].error.as_deref(), Some("open"));

        let exported = metrics.export();
        assert_eq!(exported["provider_failures"], 3);
        assert_eq!(exported["provider_skips"], 2);
        assert_eq!(cascade.provider_status().providers[0].state, BreakerState::Open);

        let json = serde_json::to_value(&last.attempts[0]).unwrap();
        assert_eq!(json["skipped"], true);
        let json = serde_json::to_value(&last.attempts[1]).unwrap();
        assert!(json.get("skipped").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_input_resolved_once() {
        let (cascade, _) = make_cascade(vec![], true);
        let report = cascade.run(&sym(&["AAPL", "AAPL"]), SyncJobType::QueryFill).await;
        assert_eq!(report.requested, sym(&["AAPL"]));
        assert_eq!(report.quotes.len(), 1);
    }
}
