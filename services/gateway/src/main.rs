mod error;
mod handlers;
mod rate_limit;
mod router;
mod state;

use market_data::clock::SystemClock;
use market_data::session::simulated::SimulatedBroker;
use market_data::store::InMemoryStore;
use market_data::{FeedConfig, MarketDataFeed};
use router::create_router;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,market_data=debug,gateway=debug";

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    tracing::info!(version = market_data::SERVICE_VERSION, "Starting market-data gateway");

    let config = FeedConfig::from_env();
    let port = config.fanout.port;

    // The broker wire protocol is out of scope; ticks come from the simulator.
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let broker = Arc::new(SimulatedBroker::new(events_tx, config.broker.simulated_tick_interval));
    let store = Arc::new(InMemoryStore::new());

    let feed = Arc::new(MarketDataFeed::new(config, broker, store, Arc::new(SystemClock))?);
    if !feed.start(events_rx).await {
        tracing::warn!("Feed was already running");
    }

    let app = create_router(AppState::new(feed.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    feed.stop().await;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
