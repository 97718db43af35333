use crate::error::AppError;
use crate::rate_limit::SYNC_LIMIT;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use market_data::cascade::ProviderAttemptResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use types::market::Symbol;
use types::sync::{SyncJobRecord, SyncStatistics};

const DEFAULT_HISTORY: usize = 50;
const MAX_HISTORY: usize = 500;
const STATISTICS_WINDOW: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub symbols: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub ok: bool,
    pub requested: usize,
    pub resolved: usize,
    pub synthetic: usize,
    pub unresolved: Vec<Symbol>,
    pub persisted: bool,
    pub attempts: Vec<ProviderAttemptResult>,
}

/// `POST /sync?symbols=A,B`: run the cascade now. No symbols means the
/// watch list.
pub async fn run_sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, AppError> {
    state.rate_limiter.check("sync", SYNC_LIMIT)?;

    let symbols: Vec<&str> = params
        .symbols
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .collect();
    let report = state.feed.manual_sync(&symbols).await?;

    Ok(Json(SyncResponse {
        ok: report.unresolved.is_empty(),
        requested: report.requested.len(),
        resolved: report.quotes.len(),
        synthetic: report.mock_count(),
        unresolved: report.unresolved,
        persisted: report.persisted,
        attempts: report.attempts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub jobs: Vec<SyncJobRecord>,
    pub statistics: SyncStatistics,
}

/// `GET /sync/jobs?limit=N`: newest first, plus last-24h statistics.
pub async fn sync_jobs(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let cascade = state
        .feed
        .cascade()
        .ok_or_else(|| AppError::ServiceUnavailable("no providers configured".into()))?;
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);

    Ok(Json(HistoryResponse {
        jobs: cascade.recorder().history(limit).await,
        statistics: cascade.recorder().statistics(STATISTICS_WINDOW).await,
    }))
}
