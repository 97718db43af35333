use crate::error::AppError;
use crate::rate_limit::QUERY_LIMIT;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use market_data::query::MarketDataResult;
use serde::Deserialize;

const DEFAULT_SOURCE: &str = "quotes";

#[derive(Debug, Deserialize)]
pub struct MarketDataParams {
    /// Comma-separated.
    pub symbols: Option<String>,
    pub source: Option<String>,
}

/// `GET /market-data?symbols=A,B&source=S`. Degraded outcomes are a 200
/// with `dataSource` and `error` set.
pub async fn get_market_data(
    State(state): State<AppState>,
    Query(params): Query<MarketDataParams>,
) -> Result<Json<MarketDataResult>, AppError> {
    state.rate_limiter.check("market_data", QUERY_LIMIT)?;

    let symbols: Vec<&str> = params
        .symbols
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .collect();
    let source = params.source.as_deref().unwrap_or(DEFAULT_SOURCE);

    Ok(Json(state.feed.query().get_market_data(&symbols, source).await))
}
