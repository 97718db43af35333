//! Append-only audit of cascade runs
//!
//! Writes are best-effort: bounded by a timeout, failures logged and
//! swallowed. Reads back the history for the control surface.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use types::sync::{SyncJobRecord, SyncJobType, SyncStatistics};

use crate::clock::Clock;
use crate::store::AuditStore;

pub struct SyncJobRecorder {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SyncJobRecorder {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { store, clock, timeout }
    }

    /// Append one record. Returns it if the write landed.
    pub async fn log(
        &self,
        job_type: SyncJobType,
        source: &str,
        success_count: u64,
        fail_count: u64,
        error_message: Option<String>,
    ) -> Option<SyncJobRecord> {
        let record = SyncJobRecord::new(
            job_type,
            source,
            success_count,
            fail_count,
            error_message,
            self.clock.now(),
        );

        match tokio::time::timeout(self.timeout, self.store.append_sync_job(&record)).await {
            Ok(Ok(())) => {
                debug!(job_type = job_type.as_str(), status = ?record.status, success_count, fail_count, "Sync job recorded");
                Some(record)
            }
            Ok(Err(err)) => {
                warn!(job_type = job_type.as_str(), %err, "Failed to record sync job");
                None
            }
            Err(_) => {
                warn!(job_type = job_type.as_str(), timeout_ms = self.timeout.as_millis() as u64, "Sync job write timed out");
                None
            }
        }
    }

    /// Newest first; empty if the store cannot be read.
    pub async fn history(&self, limit: usize) -> Vec<SyncJobRecord> {
        self.store.recent_sync_jobs(limit).await.unwrap_or_else(|err| {
            warn!(%err, "Failed to read sync job history");
            Vec::new()
        })
    }

    /// Aggregate over jobs completed within `window`.
    pub async fn statistics(&self, window: Duration) -> SyncStatistics {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let since = self.clock.now() - window;
        match self.store.sync_jobs_since(since).await {
            Ok(records) => SyncStatistics::from_records(&records),
            Err(err) => {
                warn!(%err, "Failed to read sync statistics");
                SyncStatistics::default()
            }
        }
    }
}
