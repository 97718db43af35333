//! Persistence ports
//!
//! The feed needs three write shapes from its stores: upsert of quote rows
//! keyed by `(symbol, timestamp)`, upsert of the health record keyed by
//! stream, and append-only audit inserts. Reads are limited to the
//! latest-by-symbol query, the reduced-scope recent-rows query and the
//! audit history.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use types::errors::FeedError;
use types::health::{DataHealthRecord, SystemHealthSnapshot};
use types::market::{MarketQuote, Symbol};
use types::sync::SyncJobRecord;

pub use memory::InMemoryStore;

#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Upsert rows by `(symbol, timestamp)`. Returns rows written.
    async fn upsert_quotes(&self, quotes: &[MarketQuote]) -> Result<usize, FeedError>;

    /// Newest row per symbol, considering rows at or after `since` and at
    /// most `limit` rows overall (newest first).
    async fn latest_quotes(
        &self,
        symbols: &[Symbol],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MarketQuote>, FeedError>;

    /// The `limit` most recent rows of any symbol.
    async fn recent_quotes(&self, limit: usize) -> Result<Vec<MarketQuote>, FeedError>;

    /// Timestamp of the newest non-synthetic row.
    async fn latest_real_time_at(&self) -> Result<Option<DateTime<Utc>>, FeedError>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_sync_job(&self, record: &SyncJobRecord) -> Result<(), FeedError>;

    /// Newest first.
    async fn recent_sync_jobs(&self, limit: usize) -> Result<Vec<SyncJobRecord>, FeedError>;

    async fn sync_jobs_since(&self, since: DateTime<Utc>) -> Result<Vec<SyncJobRecord>, FeedError>;
}

#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Idempotent upsert keyed by `record.stream`.
    async fn upsert_data_health(&self, record: &DataHealthRecord) -> Result<(), FeedError>;

    async fn append_system_health(&self, snapshot: &SystemHealthSnapshot) -> Result<(), FeedError>;
}
