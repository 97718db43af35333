//! Periodic self-diagnosis of the live feed
//!
//! Reads the session and hub state, classifies it, and publishes a
//! composite health record (upserted by stream) plus an append-only
//! system snapshot. Publishing is best-effort: store failures are logged
//! and never reach the ingestion path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use types::errors::FeedError;
use types::health::{DataHealthRecord, FeedHealth, HealthStatus, SystemHealthSnapshot};

use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::session::GatewaySession;
use crate::store::HealthStore;
use crate::task::PeriodicTask;

/// Where the sentinel reads feed state from.
#[async_trait]
pub trait HealthSource: Send + Sync {
    async fn snapshot(&self) -> Result<FeedHealth, FeedError>;
}

#[async_trait]
impl HealthSource for GatewaySession {
    async fn snapshot(&self) -> Result<FeedHealth, FeedError> {
        Ok(self.health())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckOutcome {
    pub status: HealthStatus,
    pub record: DataHealthRecord,
    pub snapshot: Option<SystemHealthSnapshot>,
}

impl HealthCheckOutcome {
    pub fn dhi(&self) -> f64 {
        self.record.dhi
    }
}

pub struct HealthSentinel {
    config: HealthConfig,
    source: Arc<dyn HealthSource>,
    store: Arc<dyn HealthStore>,
    clock: Arc<dyn Clock>,
    task: PeriodicTask,
}

impl HealthSentinel {
    pub fn new(
        config: HealthConfig,
        source: Arc<dyn HealthSource>,
        store: Arc<dyn HealthStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            clock,
            task: PeriodicTask::new("health-sentinel"),
        }
    }

    /// Run one check and publish it.
    pub async fn check(&self) -> HealthCheckOutcome {
        let now = self.clock.now();
        let (status, snapshot) = match self.source.snapshot().await {
            Ok(health) => {
                let status = HealthStatus::from_connected(health.connected);
                let snapshot = SystemHealthSnapshot {
                    service: self.config.service.clone(),
                    health_status: status,
                    error_count: health.error_count,
                    warning_count: health.warning_count,
                    uptime_seconds: health.uptime_seconds,
                    last_heartbeat: now,
                    connections: health.subscriber_count,
                    subscriptions: health.subs.len(),
                    connected: health.connected,
                };
                (status, Some(snapshot))
            }
            Err(err) => {
                warn!(%err, "Health check failed, reporting offline");
                (HealthStatus::Offline, None)
            }
        };

        let record = DataHealthRecord::new(self.config.stream.clone(), status, now);
        self.publish(&record, snapshot.as_ref()).await;
        debug!(status = status.as_str(), dhi = record.dhi, "Health check complete");

        HealthCheckOutcome {
            status,
            record,
            snapshot,
        }
    }

    async fn publish(&self, record: &DataHealthRecord, snapshot: Option<&SystemHealthSnapshot>) {
        if let Err(err) = self.store.upsert_data_health(record).await {
            warn!(stream = %record.stream, %err, "Failed to write health record");
        }
        if let Some(snapshot) = snapshot {
            if let Err(err) = self.store.append_system_health(snapshot).await {
                warn!(service = %snapshot.service, %err, "Failed to write system health snapshot");
            }
        }
    }

    pub fn start(self: &Arc<Self>) {
        let sentinel = Arc::clone(self);
        self.task.start(self.config.interval, move || {
            let sentinel = Arc::clone(&sentinel);
            async move {
                sentinel.check().await;
            }
        });
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}
