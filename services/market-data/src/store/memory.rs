//! In-process store
//!
//! Backs the gateway binary when no external database is wired in, and
//! every test that needs a working store.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use types::errors::FeedError;
use types::health::{DataHealthRecord, SystemHealthSnapshot};
use types::market::{MarketQuote, Symbol};
use types::sync::SyncJobRecord;

use super::{AuditStore, HealthStore, QuoteStore};

#[derive(Default)]
pub struct InMemoryStore {
    quotes: Mutex<BTreeMap<(Symbol, DateTime<Utc>), MarketQuote>>,
    sync_jobs: Mutex<Vec<SyncJobRecord>>,
    data_health: Mutex<BTreeMap<String, DataHealthRecord>>,
    system_health: Mutex<Vec<SystemHealthSnapshot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quote_count(&self) -> usize {
        lock(&self.quotes).len()
    }

    pub fn sync_jobs(&self) -> Vec<SyncJobRecord> {
        lock(&self.sync_jobs).clone()
    }

    pub fn data_health(&self, stream: &str) -> Option<DataHealthRecord> {
        lock(&self.data_health).get(stream).cloned()
    }

    pub fn system_health(&self) -> Vec<SystemHealthSnapshot> {
        lock(&self.system_health).clone()
    }

    /// All rows, newest first.
    fn newest_first(&self) -> Vec<MarketQuote> {
        let mut rows: Vec<MarketQuote> = lock(&self.quotes).values().cloned().collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows
    }
}

#[async_trait]
impl QuoteStore for InMemoryStore {
    async fn upsert_quotes(&self, quotes: &[MarketQuote]) -> Result<usize, FeedError> {
        let mut rows = lock(&self.quotes);
        for quote in quotes {
            rows.insert(quote.key(), quote.clone());
        }
        Ok(quotes.len())
    }

    async fn latest_quotes(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MarketQuote>, FeedError> {
        let wanted: HashSet<&Symbol> = symbols.iter().collect();
        let mut seen = HashSet::new();
        Ok(self
            .newest_first()
            .into_iter()
            .filter(|q| wanted.contains(&q.symbol) && q.timestamp >= since)
            .take(limit)
            .filter(|q| seen.insert(q.symbol.clone()))
            .collect())
    }

    async fn recent_quotes(&self, limit: usize) -> Result<Vec<MarketQuote>, FeedError> {
        Ok(self.newest_first().into_iter().take(limit).collect())
    }

    async fn latest_real_time_at(&self) -> Result<Option<DateTime<Utc>>, FeedError> {
        Ok(lock(&self.quotes)
            .values()
            .filter(|q| !q.is_mock_data)
            .map(|q| q.timestamp)
            .max())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_sync_job(&self, record: &SyncJobRecord) -> Result<(), FeedError> {
        lock(&self.sync_jobs).push(record.clone());
        Ok(())
    }

    async fn recent_sync_jobs(&self, limit: usize) -> Result<Vec<SyncJobRecord>, FeedError> {
        let mut jobs = lock(&self.sync_jobs).clone();
        jobs.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn sync_jobs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncJobRecord>, FeedError> {
        Ok(lock(&self.sync_jobs)
            .iter()
            .filter(|job| job.completed_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HealthStore for InMemoryStore {
    async fn upsert_data_health(&self, record: &DataHealthRecord) -> Result<(), FeedError> {
        lock(&self.data_health).insert(record.stream.clone(), record.clone());
        Ok(())
    }

    async fn append_system_health(&self, snapshot: &SystemHealthSnapshot) -> Result<(), FeedError> {
        lock(&self.system_health).push(snapshot.clone());
        Ok(())
    }
}
