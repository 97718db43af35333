//! Sync-job audit records
//!
//! One record per cascade run. Records are append-only.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SyncJobId;

/// Asset column value for runs that cover a batch of symbols.
pub const BATCH_ASSET: &str = "BATCH";

/// What triggered a cascade run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobType {
    /// Query path found symbols missing from the store.
    QueryFill,
    /// Periodic refresh of the watch-list.
    ScheduledSync,
    /// Operator-triggered run.
    ManualSync,
}

impl SyncJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncJobType::QueryFill => "query_fill",
            SyncJobType::ScheduledSync => "scheduled_sync",
            SyncJobType::ManualSync => "manual_sync",
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
    Completed,
    Partial,
    Failed,
}

impl SyncJobStatus {
    /// An error message wins over partial failure counts.
    pub fn classify(fail_count: u64, error_message: Option<&str>) -> Self {
        if error_message.is_some() {
            SyncJobStatus::Failed
        } else if fail_count > 0 {
            SyncJobStatus::Partial
        } else {
            SyncJobStatus::Completed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJobRecord {
    pub id: SyncJobId,
    pub job_type: SyncJobType,
    pub asset_symbol: String,
    pub status: SyncJobStatus,
    pub api_source: String,
    pub success_count: u64,
    pub fail_count: u64,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl SyncJobRecord {
    pub fn new(
        job_type: SyncJobType,
        api_source: impl Into<String>,
        success_count: u64,
        fail_count: u64,
        error_message: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SyncJobId::new(),
            job_type,
            asset_symbol: BATCH_ASSET.to_string(),
            status: SyncJobStatus::classify(fail_count, error_message.as_deref()),
            api_source: api_source.into(),
            success_count,
            fail_count,
            error_message,
            completed_at,
        }
    }
}

/// Aggregate view over a window of sync jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub total_jobs: u64,
    pub successful_jobs: u64,
    /// Percentage of completed jobs, 0..=100.
    pub success_rate: f64,
    pub data_points: u64,
    pub sources: Vec<String>,
}

impl SyncStatistics {
    pub fn from_records(records: &[SyncJobRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total_jobs = records.len() as u64;
        let successful_jobs = records
            .iter()
            .filter(|r| r.status == SyncJobStatus::Completed)
            .count() as u64;
        let data_points = records.iter().map(|r| r.success_count).sum();
        let sources: BTreeSet<&str> = records.iter().map(|r| r.api_source.as_str()).collect();

        Self {
            total_jobs,
            successful_jobs,
            success_rate: successful_jobs as f64 / total_jobs as f64 * 100.0,
            data_points,
            sources: sources.into_iter().map(str::to_string).collect(),
        }
    }
}
