//! Market Data Service
//!
//! Keeps one live session to an upstream broker gateway and turns its tick
//! stream into a downstream broadcast, while serving a resilient
//! "current data for these symbols" query backed by a store and a chain of
//! quote providers.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!  broker gateway ──▶│GatewaySession│◀── reconnect (15s)
//!                    └──┬────────▲──┘
//!                 ticks │        │ subscribe (≤1 per 150ms)
//!                  ┌────▼───┐ ┌──┴──────────────┐
//!   heartbeat ────▶│ Fanout │ │SubscriptionPacer│
//!     (20s)        │  Hub   │ └─────────────────┘
//!                  └───┬────┘
//!                      ▼                         HealthSentinel (60s) ──▶ health store
//!                 subscribers
//!
//!  get_market_data ──▶ cache ─▶ breaker ─▶ limiter ─▶ store read ─┬─▶ result
//!                                                     (retry,     │
//!                                                     reduced)    └─▶ ProviderCascade ──▶ store
//!                                                                        └─▶ SyncJobRecorder
//! ```

pub mod cascade;
pub mod clock;
pub mod config;
pub mod fanout;
pub mod feed;
pub mod freshness;
pub mod health;
pub mod heartbeat;
pub mod metrics;
pub mod pacer;
pub mod query;
pub mod recorder;
pub mod session;
pub mod store;
pub mod task;

pub use config::FeedConfig;
pub use feed::MarketDataFeed;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
