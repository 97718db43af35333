use crate::error::AppError;
use crate::rate_limit::SUBSCRIBE_LIMIT;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub symbol: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeResponse {
    pub ok: bool,
    pub symbol: String,
    pub queued: bool,
}

/// `POST /subscribe?symbol=X`: hand the symbol to the pacer. A symbol that
/// is already pending stays queued once.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> Result<Json<SubscribeResponse>, AppError> {
    state.rate_limiter.check("subscribe", SUBSCRIBE_LIMIT)?;

    let raw = params
        .symbol
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("symbol required".into()))?;
    let (symbol, newly_queued) = state.feed.queue_subscription(&raw)?;
    tracing::info!(%symbol, newly_queued, "Subscription requested");

    Ok(Json(SubscribeResponse {
        ok: true,
        symbol: symbol.to_string(),
        queued: true,
    }))
}
