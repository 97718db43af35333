//! Upstream broker gateway session
//!
//! Owns the single connection to the broker feed. The wire protocol lives
//! behind [`BrokerClient`]; the broker reports what happens on the wire as
//! [`GatewayEvent`]s, and every event enters through
//! [`GatewaySession::handle_event`].
//!
//! ```text
//! BrokerClient ──events──▶ handle_event ──Tick──▶ TickFanoutHub
//!      ▲                        │
//!      │                        ├─Error────▶ error_count += 1
//!  connect / subscribe          └─Disconnected▶ warning_count += 1
//! ```

pub mod simulated;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use types::errors::FeedError;
use types::health::FeedHealth;
use types::ids::TickerId;
use types::market::{ContractSpec, Symbol, TickMessage, UpstreamTick};

use crate::clock::{elapsed_between, Clock};
use crate::config::BrokerConfig;
use crate::fanout::TickFanoutHub;
use crate::metrics::FeedMetrics;
use crate::task::PeriodicTask;

/// Opaque upstream gateway connection.
///
/// Implementations push [`GatewayEvent`]s into the channel they were built
/// with; this trait only covers the request side.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), FeedError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    async fn request_market_data(
        &self,
        ticker_id: TickerId,
        contract: &ContractSpec,
    ) -> Result<(), FeedError>;
}

/// Everything the upstream gateway can tell us.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connected,
    Disconnected,
    Tick(UpstreamTick),
    Error { code: Option<i32>, reason: String },
}

pub struct GatewaySession {
    config: BrokerConfig,
    broker: Arc<dyn BrokerClient>,
    hub: Arc<TickFanoutHub>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FeedMetrics>,
    error_count: AtomicU64,
    warning_count: AtomicU64,
    started_at: DateTime<Utc>,
    /// Live upstream subscriptions.
    subscriptions: Mutex<BTreeMap<TickerId, Symbol>>,
    /// Symbols whose subscriptions died with the last disconnect.
    lapsed: Mutex<Vec<Symbol>>,
    reconnect: PeriodicTask,
}

impl GatewaySession {
    pub fn new(
        config: BrokerConfig,
        broker: Arc<dyn BrokerClient>,
        hub: Arc<TickFanoutHub>,
        clock: Arc<dyn Clock>,
        metrics: Arc<FeedMetrics>,
    ) -> Self {
        let started_at = clock.now();
        Self {
            config,
            broker,
            hub,
            clock,
            metrics,
            error_count: AtomicU64::new(0),
            warning_count: AtomicU64::new(0),
            started_at,
            subscriptions: Mutex::new(BTreeMap::new()),
            lapsed: Mutex::new(Vec::new()),
            reconnect: PeriodicTask::new("gateway-reconnect"),
        }
    }

    pub async fn connect(&self) -> Result<(), FeedError> {
        let BrokerConfig { host, port, client_id, paper, .. } = &self.config;
        match self.broker.connect(host, *port, *client_id).await {
            Ok(()) => {
                info!(%host, port, client_id, paper, "Connected to broker gateway");
                Ok(())
            }
            Err(err) => {
                warn!(%host, port, %err, "Broker gateway connection failed");
                Err(err)
            }
        }
    }

    pub async fn disconnect(&self) {
        self.broker.disconnect().await;
        info!("Disconnected from broker gateway");
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Issue one upstream market-data subscription.
    pub async fn subscribe(
        &self,
        ticker_id: TickerId,
        symbol: &Symbol,
        contract: &ContractSpec,
    ) -> Result<(), FeedError> {
        if !self.is_connected() {
            return Err(FeedError::Connection("broker gateway not connected".to_string()));
        }
        self.broker.request_market_data(ticker_id, contract).await?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ticker_id, symbol.clone());
        info!(%symbol, %ticker_id, "Subscribed to market data");
        Ok(())
    }

    /// Single ingress for upstream events.
    pub fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Connected => {
                debug!("Broker gateway reported connected");
            }
            GatewayEvent::Disconnected => {
                self.warning_count.fetch_add(1, Ordering::Relaxed);
                let dropped: Vec<Symbol> = std::mem::take(
                    &mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner),
                )
                .into_values()
                .collect();
                warn!(lapsed = dropped.len(), "Broker gateway disconnected");
                self.lapsed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(dropped);
            }
            GatewayEvent::Tick(tick) => {
                let symbol = self.symbol_for(tick.ticker_id);
                let message = TickMessage::from_upstream(tick, symbol, self.clock.now_millis());
                self.hub.broadcast(&message);
            }
            GatewayEvent::Error { code, reason } => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                error!(?code, %reason, "Broker gateway error");
            }
        }
    }

    /// Start the reconnect loop. Failures are swallowed and retried.
    pub fn start_reconnect(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.reconnect.start(self.config.reconnect_interval, move || {
            let session = Arc::clone(&session);
            async move {
                if session.is_connected() {
                    return;
                }
                debug!("Reconnect attempt");
                // Already logged inside connect().
                let _ = session.connect().await;
            }
        });
    }

    pub fn stop_reconnect(&self) {
        self.reconnect.stop();
    }

    pub fn symbol_for(&self, ticker_id: TickerId) -> Option<Symbol> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticker_id)
            .cloned()
    }

    /// Symbols to re-subscribe after a reconnect. Drains the list.
    pub fn take_lapsed(&self) -> Vec<Symbol> {
        std::mem::take(&mut *self.lapsed.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// True while `symbol` has a live upstream subscription.
    pub fn is_subscribed(&self, symbol: &Symbol) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|s| s == symbol)
    }

    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn warning_count(&self) -> u64 {
        self.warning_count.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        elapsed_between(self.started_at, self.clock.now()).as_secs()
    }

    pub fn metrics(&self) -> &FeedMetrics {
        &self.metrics
    }

    /// Snapshot of session and hub state for `GET /health`.
    pub fn health(&self) -> FeedHealth {
        let connected = self.is_connected();
        FeedHealth {
            ok: connected,
            connected,
            subs: self.subscribed_symbols(),
            subscriber_count: self.hub.subscriber_count(),
            host: self.config.host.clone(),
            port: self.config.port,
            paper: self.config.paper,
            uptime_seconds: self.uptime_seconds(),
            error_count: self.error_count(),
            warning_count: self.warning_count(),
            ts: self.clock.now(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StubBroker;
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FanoutConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use types::market::TickValue;

    fn make_session(broker: Arc<StubBroker>) -> (Arc<GatewaySession>, Arc<TickFanoutHub>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_millis(1_700_000_000_000));
        let metrics = Arc::new(FeedMetrics::new());
        let hub = Arc::new(TickFanoutHub::new(FanoutConfig::default(), clock.clone(), metrics.clone()));
        let session = Arc::new(GatewaySession::new(
            BrokerConfig::default(),
            broker,
            hub.clone(),
            clock.clone(),
            metrics,
        ));
        (session, hub, clock)
    }

    fn aapl() -> Symbol {
        Symbol::parse("AAPL").unwrap()
    }

    #[test]
    fn test_error_and_disconnect_counters() {
        let (session, _, _) = make_session(StubBroker::connected());
        session.handle_event(GatewayEvent::Error { code: Some(2104), reason: "farm ok".into() });
        session.handle_event(GatewayEvent::Error { code: None, reason: "socket".into() });
        session.handle_event(GatewayEvent::Disconnected);

        assert_eq!(session.error_count(), 2);
        assert_eq!(session.warning_count(), 1);
    }

    #[tokio::test]
    async fn test_tick_is_broadcast_with_symbol() {
        let (session, hub, _) = make_session(StubBroker::connected());
        let (_id, mut rx) = hub.register_channel();
        let symbol = aapl();
        session
            .subscribe(TickerId::new(1000), &symbol, &ContractSpec::for_symbol(&symbol))
            .await
            .unwrap();

        session.handle_event(GatewayEvent::Tick(UpstreamTick {
            ticker_id: TickerId::new(1000),
            field: 4,
            value: TickValue::Price(dec!(190.5)),
        }));

        let payload = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["t"], "tickPrice");
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["ts"], 1_700_000_000_000_i64);
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let broker = Arc::new(StubBroker::default());
        let (session, _, _) = make_session(broker.clone());
        let symbol = aapl();
        let result = session
            .subscribe(TickerId::new(1000), &symbol, &ContractSpec::for_symbol(&symbol))
            .await;
        assert!(matches!(result, Err(FeedError::Connection(_))));
        assert!(broker.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_moves_subscriptions_to_lapsed() {
        let (session, _, _) = make_session(StubBroker::connected());
        let symbol = aapl();
        session
            .subscribe(TickerId::new(1000), &symbol, &ContractSpec::for_symbol(&symbol))
            .await
            .unwrap();

        session.handle_event(GatewayEvent::Disconnected);
        assert!(session.subscribed_symbols().is_empty());
        assert_eq!(session.take_lapsed(), vec![symbol]);
        assert!(session.take_lapsed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_loop_swallows_failures() {
        let broker = Arc::new(StubBroker::default());
        broker.refuse_connect.store(true, Ordering::SeqCst);
        let (session, _, _) = make_session(broker.clone());

        session.start_reconnect();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(broker.connect_attempts.load(Ordering::SeqCst), 2);
        assert!(!session.is_connected());

        broker.refuse_connect.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(session.is_connected());

        // Connected sessions are left alone.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(broker.connect_attempts.load(Ordering::SeqCst), 3);
        session.stop_reconnect();
    }

    #[test]
    fn test_health_snapshot() {
        let (session, hub, clock) = make_session(StubBroker::connected());
        let (_id, _rx) = hub.register_channel();
        clock.advance(Duration::from_secs(90));
        session.handle_event(GatewayEvent::Error { code: None, reason: "x".into() });

        let health = session.health();
        assert!(health.ok);
        assert!(health.connected);
        assert_eq!(health.subscriber_count, 1);
        assert_eq!(health.uptime_seconds, 90);
        assert_eq!(health.error_count, 1);
        assert_eq!(health.port, 4002);
    }

    #[test]
    fn test_health_not_ok_while_disconnected() {
        let (session, _, _) = make_session(Arc::new(StubBroker::default()));
        let health = session.health();
        assert!(!health.connected);
        assert!(!health.ok);
    }

    #[tokio::test]
    async fn test_is_subscribed_follows_disconnect() {
        let (session, _, _) = make_session(StubBroker::connected());
        let symbol = aapl();
        assert!(!session.is_subscribed(&symbol));
        session
            .subscribe(TickerId::new(1000), &symbol, &ContractSpec::for_symbol(&symbol))
            .await
            .unwrap();
        assert!(session.is_subscribed(&symbol));

        session.handle_event(GatewayEvent::Disconnected);
        assert!(!session.is_subscribed(&symbol));
    }
}
