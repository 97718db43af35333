//! Health types published by the feed
//!
//! The composite data health index (DHI) summarises timeliness,
//! consistency, completeness, coverage and anomaly scores of one stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::Symbol;

/// Classified health of the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Offline,
}

impl HealthStatus {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Offline
        }
    }

    /// Composite health index for this status.
    pub fn dhi(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.95,
            HealthStatus::Offline => 0.1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Offline => "offline",
        }
    }
}

/// Composite health record, upserted by stream name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataHealthRecord {
    pub stream: String,
    pub status: HealthStatus,
    pub dhi: f64,
    pub timeliness: f64,
    pub consistency: f64,
    pub completeness: f64,
    pub coverage: f64,
    pub anomaly_inverse: f64,
    pub license_status: u8,
    pub recorded_at: DateTime<Utc>,
}

impl DataHealthRecord {
    pub fn new(stream: impl Into<String>, status: HealthStatus, recorded_at: DateTime<Utc>) -> Self {
        let (timeliness, consistency, completeness, coverage, anomaly_inverse) = match status {
            HealthStatus::Healthy => (0.98, 0.95, 0.92, 0.90, 0.95),
            HealthStatus::Offline => (0.3, 0.4, 0.2, 0.1, 0.2),
        };
        Self {
            stream: stream.into(),
            status,
            dhi: status.dhi(),
            timeliness,
            consistency,
            completeness,
            coverage,
            anomaly_inverse,
            license_status: 1,
            recorded_at,
        }
    }
}

/// Point-in-time view of the live session and fan-out hub.
///
/// Served as-is by `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedHealth {
    pub ok: bool,
    pub connected: bool,
    pub subs: Vec<Symbol>,
    pub subscriber_count: usize,
    pub host: String,
    pub port: u16,
    pub paper: bool,
    pub uptime_seconds: u64,
    pub error_count: u64,
    pub warning_count: u64,
    pub ts: DateTime<Utc>,
}

/// Append-only system health snapshot written alongside the DHI record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSnapshot {
    pub service: String,
    pub health_status: HealthStatus,
    pub error_count: u64,
    pub warning_count: u64,
    pub uptime_seconds: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub connections: usize,
    pub subscriptions: usize,
    pub connected: bool,
}
