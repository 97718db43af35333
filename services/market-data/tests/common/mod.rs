//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_data::clock::ManualClock;
use market_data::store::{AuditStore, HealthStore, InMemoryStore, QuoteStore};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use types::errors::FeedError;
use types::health::{DataHealthRecord, SystemHealthSnapshot};
use types::market::{MarketQuote, Symbol};
use types::sync::SyncJobRecord;

pub const T0_MILLIS: i64 = 1_700_000_000_000;

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::at_epoch_millis(T0_MILLIS))
}

pub fn sym(raw: &str) -> Symbol {
    Symbol::parse(raw).unwrap()
}

pub fn syms(raw: &[&str]) -> Vec<Symbol> {
    raw.iter().map(|s| sym(s)).collect()
}

pub fn quote(symbol: &str, millis: i64, price: &str) -> MarketQuote {
    MarketQuote {
        symbol: sym(symbol),
        price: price.parse::<Decimal>().unwrap(),
        open: None,
        high: None,
        low: None,
        previous_close: None,
        change: None,
        change_percent: None,
        volume: Some(250_000),
        timestamp: DateTime::from_timestamp_millis(millis).unwrap(),
        source: "fixture".to_string(),
        is_mock_data: false,
    }
}

/// How [`ScriptedStore`] answers the latest-by-symbol read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadMode {
    Healthy = 0,
    /// Every read fails with a connection error.
    Unreachable = 1,
    /// The latest-by-symbol read never returns; other reads work.
    Hanging = 2,
    /// The latest-by-symbol read waits for a gate permit.
    Gated = 3,
}

/// In-memory store whose read path can be broken on demand.
pub struct ScriptedStore {
    pub inner: InMemoryStore,
    mode: AtomicU8,
    pub latest_calls: AtomicUsize,
    pub gate: Semaphore,
}

impl ScriptedStore {
    pub fn new(mode: ReadMode) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            mode: AtomicU8::new(mode as u8),
            latest_calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    pub fn set_mode(&self, mode: ReadMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    fn mode(&self) -> ReadMode {
        match self.mode.load(Ordering::SeqCst) {
            1 => ReadMode::Unreachable,
            2 => ReadMode::Hanging,
            3 => ReadMode::Gated,
            _ => ReadMode::Healthy,
        }
    }

    pub fn calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn unreachable() -> FeedError {
        FeedError::Connection("connection reset by peer".into())
    }
}

#[async_trait]
impl QuoteStore for ScriptedStore {
    async fn upsert_quotes(&self, quotes: &[MarketQuote]) -> Result<usize, FeedError> {
        self.inner.upsert_quotes(quotes).await
    }

    async fn latest_quotes(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MarketQuote>, FeedError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            ReadMode::Healthy => {}
            ReadMode::Unreachable => return Err(Self::unreachable()),
            ReadMode::Hanging => std::future::pending::<()>().await,
            ReadMode::Gated => {
                let _permit = self.gate.acquire().await.map_err(|_| Self::unreachable())?;
            }
        }
        self.inner.latest_quotes(symbols, since, limit).await
    }

    async fn recent_quotes(&self, limit: usize) -> Result<Vec<MarketQuote>, FeedError> {
        if self.mode() == ReadMode::Unreachable {
            return Err(Self::unreachable());
        }
        self.inner.recent_quotes(limit).await
    }

    async fn latest_real_time_at(&self) -> Result<Option<DateTime<Utc>>, FeedError> {
        if self.mode() == ReadMode::Unreachable {
            return Err(Self::unreachable());
        }
        self.inner.latest_real_time_at().await
    }
}

#[async_trait]
impl AuditStore for ScriptedStore {
    async fn append_sync_job(&self, record: &SyncJobRecord) -> Result<(), FeedError> {
        self.inner.append_sync_job(record).await
    }

    async fn recent_sync_jobs(&self, limit: usize) -> Result<Vec<SyncJobRecord>, FeedError> {
        self.inner.recent_sync_jobs(limit).await
    }

    async fn sync_jobs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncJobRecord>, FeedError> {
        self.inner.sync_jobs_since(since).await
    }
}

#[async_trait]
impl HealthStore for ScriptedStore {
    async fn upsert_data_health(&self, record: &DataHealthRecord) -> Result<(), FeedError> {
        self.inner.upsert_data_health(record).await
    }

    async fn append_system_health(&self, snapshot: &SystemHealthSnapshot) -> Result<(), FeedError> {
        self.inner.append_system_health(snapshot).await
    }
}
