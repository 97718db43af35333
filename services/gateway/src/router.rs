use crate::handlers::{health, market_data, subscribe, sync, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/providers", get(health::providers))
        .route("/subscribe", post(subscribe::subscribe))
        .route("/market-data", get(market_data::get_market_data))
        .route("/sync", post(sync::run_sync))
        .route("/sync/jobs", get(sync::sync_jobs))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
