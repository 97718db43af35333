//! Live ingestion path, end to end over the simulated broker
//!
//! - duplicate queueing before a drain yields one subscribe call
//! - at most one subscribe per pacing window, FIFO
//! - a failing subscriber never blocks delivery to the others
//! - the health sentinel classifies connected/disconnected sessions

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{clock, sym};
use market_data::clock::{Clock, ManualClock};
use market_data::config::{BrokerConfig, FanoutConfig, HealthConfig, PacerConfig};
use market_data::fanout::{Payload, SinkError, SubscriberSink, TickFanoutHub};
use market_data::health::HealthSentinel;
use market_data::metrics::FeedMetrics;
use market_data::pacer::{DrainOutcome, SubscriptionPacer};
use market_data::session::simulated::SimulatedBroker;
use market_data::session::{BrokerClient, GatewayEvent, GatewaySession};
use market_data::store::InMemoryStore;
use tokio::sync::mpsc;
use types::health::HealthStatus;
use types::ids::TickerId;
use types::market::{ContractSpec, TickMessage};

struct Live {
    session: Arc<GatewaySession>,
    hub: Arc<TickFanoutHub>,
    pacer: Arc<SubscriptionPacer>,
    broker: Arc<SimulatedBroker>,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    clock: Arc<ManualClock>,
}

async fn live() -> Live {
    let (tx, events) = mpsc::unbounded_channel();
    let broker = Arc::new(SimulatedBroker::new(tx, Duration::from_secs(60)));
    let clock = clock();
    let metrics = Arc::new(FeedMetrics::new());
    let hub = Arc::new(TickFanoutHub::new(FanoutConfig::default(), clock.clone(), metrics.clone()));
    let session = Arc::new(GatewaySession::new(
        BrokerConfig::default(),
        broker.clone(),
        hub.clone(),
        clock.clone(),
        metrics,
    ));
    session.connect().await.unwrap();
    let pacer = Arc::new(SubscriptionPacer::new(PacerConfig::default(), session.clone(), clock.clone()));
    Live { session, hub, pacer, broker, events, clock }
}

#[tokio::test]
async fn test_duplicate_queue_before_drain_issues_one_subscribe() {
    let live = live().await;
    let aapl = sym("AAPL");
    let contract = ContractSpec::for_symbol(&aapl);

    assert!(live.pacer.queue_subscription(aapl.clone(), contract.clone()));
    assert!(!live.pacer.queue_subscription(aapl.clone(), contract));
    assert_eq!(live.pacer.pending(), vec![aapl.clone()]);

    assert_eq!(
        live.pacer.drain_once().await,
        DrainOutcome::Issued { symbol: aapl.clone(), ticker_id: TickerId::new(1000) }
    );
    assert_eq!(live.pacer.drain_once().await, DrainOutcome::Idle);
    assert_eq!(live.session.subscribed_symbols(), vec![aapl]);
}

#[tokio::test(start_paused = true)]
async fn test_pacer_issues_one_per_window_in_fifo_order() {
    let live = live().await;
    for raw in ["MSFT", "AAPL", "EUR.USD", "SPY"] {
        live.pacer.queue_symbol(sym(raw));
    }

    live.pacer.start();
    // Sample between drain ticks.
    tokio::time::sleep(Duration::from_millis(75)).await;
    let mut issued_per_window = Vec::new();
    let mut previous = 0;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let now = live.session.subscribed_symbols().len();
        issued_per_window.push(now - previous);
        previous = now;
    }
    live.pacer.stop();

    assert!(issued_per_window.iter().all(|n| *n <= 1), "{issued_per_window:?}");
    // Ticker ids follow queue order.
    let order: Vec<String> = live.session.subscribed_symbols().iter().map(|s| s.to_string()).collect();
    assert_eq!(order, vec!["MSFT", "AAPL", "EUR.USD", "SPY"]);
    assert_eq!(live.session.symbol_for(TickerId::new(1002)), Some(sym("EUR.USD")));
}

struct BrokenSink;

impl SubscriberSink for BrokenSink {
    fn send(&self, _payload: Payload) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let live = live().await;
    let (_a, mut rx_a) = live.hub.register_channel();
    let broken = live.hub.register(Arc::new(BrokenSink));
    let (_c, mut rx_c) = live.hub.register_channel();

    let report = live.hub.broadcast(&TickMessage::heartbeat(live.clock.now_millis()));
    assert_eq!(report.delivered, 2);
    assert_eq!(report.dropped, vec![broken]);
    assert_eq!(live.hub.subscriber_count(), 2);
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_c.try_recv().is_ok());
}

#[tokio::test]
async fn test_simulated_ticks_reach_subscribers_with_symbol() {
    let mut live = live().await;
    let (_id, mut rx) = live.hub.register_channel();
    live.pacer.queue_symbol(sym("NVDA"));
    live.pacer.drain_once().await;

    // Connected, then the first burst of ticks.
    let mut forwarded = 0;
    while forwarded < 4 {
        let Some(event) = live.events.recv().await else { break };
        if matches!(event, GatewayEvent::Tick(_)) {
            forwarded += 1;
        }
        live.session.handle_event(event);
    }

    let payload = rx.recv().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(json["t"], "tickPrice");
    assert_eq!(json["symbol"], "NVDA");
    assert_eq!(json["tickerId"], 1000);
}

#[tokio::test]
async fn test_health_sentinel_tracks_connection() {
    let live = live().await;
    let store = Arc::new(InMemoryStore::new());
    let sentinel = HealthSentinel::new(HealthConfig::default(), live.session.clone(), store.clone(), live.clock.clone());

    let healthy = sentinel.check().await;
    assert_eq!(healthy.status, HealthStatus::Healthy);
    assert_eq!(store.data_health("broker.market_data").unwrap().dhi, 0.95);

    live.broker.disconnect().await;
    let offline = sentinel.check().await;
    assert_eq!(offline.status, HealthStatus::Offline);
    let record = store.data_health("broker.market_data").unwrap();
    assert_eq!(record.dhi, 0.1);
    assert_eq!(record.status, HealthStatus::Offline);
    assert_eq!(store.system_health().len(), 2);
}
