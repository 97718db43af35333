//! Freshness of the stored real-time data
//!
//! Looks at the newest non-synthetic quote in the store. A verdict is
//! reused for a short window so bursts of queries do not all hit the store.
//! Store failures produce a stale verdict with a reason, never an error.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{elapsed_between, Clock};
use crate::config::FreshnessConfig;
use crate::store::QuoteStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessReport {
    pub is_fresh: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub age_seconds: Option<u64>,
    pub reason: Option<String>,
}

pub struct FreshnessCheck {
    config: FreshnessConfig,
    store: Arc<dyn QuoteStore>,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<(DateTime<Utc>, FreshnessReport)>>,
}

impl FreshnessCheck {
    pub fn new(config: FreshnessConfig, store: Arc<dyn QuoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            last: Mutex::new(None),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.config.max_age
    }

    pub async fn check(&self) -> FreshnessReport {
        let now = self.clock.now();
        if let Some(report) = self.cached(now) {
            return report;
        }

        let report = match self.store.latest_real_time_at().await {
            Ok(Some(last_update)) => {
                let age = elapsed_between(last_update, now);
                let is_fresh = age < self.config.max_age;
                FreshnessReport {
                    is_fresh,
                    last_update: Some(last_update),
                    age_seconds: Some(age.as_secs()),
                    reason: (!is_fresh).then(|| format!("newest real-time row is {}s old", age.as_secs())),
                }
            }
            Ok(None) => FreshnessReport {
                is_fresh: false,
                last_update: None,
                age_seconds: None,
                reason: Some("no real-time data".to_string()),
            },
            Err(err) => {
                warn!(%err, "Freshness check failed");
                return FreshnessReport {
                    is_fresh: false,
                    last_update: None,
                    age_seconds: None,
                    reason: Some(err.to_string()),
                };
            }
        };

        debug!(is_fresh = report.is_fresh, age_s = ?report.age_seconds, "Freshness checked");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some((now, report.clone()));
        report
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<FreshnessReport> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.as_ref() {
            Some((at, report)) if elapsed_between(*at, now) < self.config.cache_for => Some(report.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use crate::testing::quote_at;

    const T0: i64 = 1_700_000_000_000;

    fn make_check(store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> FreshnessCheck {
        FreshnessCheck::new(FreshnessConfig::default(), store, clock)
    }

    #[tokio::test]
    async fn test_recent_data_is_fresh() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_quotes(&[quote_at("AAPL", T0 - 60_000, "1")]).await.unwrap();
        let check = make_check(store, Arc::new(ManualClock::at_epoch_millis(T0)));

        let report = check.check().await;
        assert!(report.is_fresh);
        assert_eq!(report.age_seconds, Some(60));
        assert!(report.reason.is_none());
    }

    #[tokio::test]
    async fn test_old_or_missing_data_is_stale() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_millis(T0));
        let check = make_check(store.clone(), clock.clone());
        assert!(!check.check().await.is_fresh);

        store.upsert_quotes(&[quote_at("AAPL", T0 - 11 * 60_000, "1")]).await.unwrap();
        clock.advance(Duration::from_secs(31));
        let report = check.check().await;
        assert!(!report.is_fresh);
        assert!(report.reason.unwrap().contains("old"));
    }

    #[tokio::test]
    async fn test_verdict_reused_within_window() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch_millis(T0));
        let check = make_check(store.clone(), clock.clone());
        assert!(!check.check().await.is_fresh);

        store.upsert_quotes(&[quote_at("AAPL", T0, "1")]).await.unwrap();
        clock.advance(Duration::from_secs(10));
        assert!(!check.check().await.is_fresh);

        clock.advance(Duration::from_secs(25));
        assert!(check.check().await.is_fresh);
    }
}
