use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State};
use market_data::cascade::ProviderStatusReport;
use std::collections::BTreeMap;
use types::health::FeedHealth;

pub async fn health(State(state): State<AppState>) -> Json<FeedHealth> {
    Json(state.feed.session().health())
}

pub async fn metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.feed.metrics().export())
}

/// `GET /providers`: circuit state and call statistics per HTTP provider.
pub async fn providers(State(state): State<AppState>) -> Result<Json<ProviderStatusReport>, AppError> {
    let cascade = state
        .feed
        .cascade()
        .ok_or_else(|| AppError::ServiceUnavailable("no providers configured".into()))?;
    Ok(Json(cascade.provider_status()))
}
