//! Feed supervisor
//!
//! Wires one [`GatewaySession`] to its pacer, fan-out hub, heartbeat and
//! health sentinel, and owns the query gateway and provider cascade that
//! share its store. [`MarketDataFeed::start`] brings everything up;
//! [`MarketDataFeed::stop`] tears it down and may be called repeatedly.
//!
//! ```text
//!  broker events ──▶ event pump ──▶ ingest ──Connected──▶ pacer.queue(watch list + lapsed)
//!                                     │
//!                                     └──▶ session.handle_event ──▶ hub
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::errors::FeedError;
use types::market::Symbol;
use types::sync::SyncJobType;

use crate::cascade::{CascadeReport, DeterministicFallback, HttpQuoteProvider, ProviderCascade, QuoteProvider};
use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::fanout::TickFanoutHub;
use crate::freshness::FreshnessCheck;
use crate::health::HealthSentinel;
use crate::heartbeat::HeartbeatBroadcaster;
use crate::metrics::FeedMetrics;
use crate::pacer::SubscriptionPacer;
use crate::query::ResilientQueryGateway;
use crate::recorder::SyncJobRecorder;
use crate::session::{BrokerClient, GatewayEvent, GatewaySession};
use crate::store::{AuditStore, HealthStore, QuoteStore};
use crate::task::PeriodicTask;

pub struct MarketDataFeed {
    config: FeedConfig,
    metrics: Arc<FeedMetrics>,
    hub: Arc<TickFanoutHub>,
    session: Arc<GatewaySession>,
    pacer: Arc<SubscriptionPacer>,
    heartbeat: Arc<HeartbeatBroadcaster>,
    sentinel: Arc<HealthSentinel>,
    query: Arc<ResilientQueryGateway>,
    cascade: Option<Arc<ProviderCascade>>,
    scheduled_sync: PeriodicTask,
    event_pump: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MarketDataFeed {
    /// Build a feed with HTTP providers taken from `config.cascade`.
    pub fn new<S>(
        config: FeedConfig,
        broker: Arc<dyn BrokerClient>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FeedError>
    where
        S: QuoteStore + AuditStore + HealthStore + 'static,
    {
        let providers = config
            .cascade
            .providers
            .iter()
            .cloned()
            .map(|provider| HttpQuoteProvider::new(provider, clock.clone()).map(|p| Arc::new(p) as Arc<dyn QuoteProvider>))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_providers(config, broker, store, clock, providers))
    }

    pub fn with_providers<S>(
        config: FeedConfig,
        broker: Arc<dyn BrokerClient>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        providers: Vec<Arc<dyn QuoteProvider>>,
    ) -> Self
    where
        S: QuoteStore + AuditStore + HealthStore + 'static,
    {
        let metrics = Arc::new(FeedMetrics::new());
        let hub = Arc::new(TickFanoutHub::new(config.fanout.clone(), clock.clone(), metrics.clone()));
        let session = Arc::new(GatewaySession::new(
            config.broker.clone(),
            broker,
            hub.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let pacer = Arc::new(SubscriptionPacer::new(config.pacer.clone(), session.clone(), clock.clone()));
        let heartbeat = Arc::new(HeartbeatBroadcaster::new(config.heartbeat.clone(), hub.clone(), clock.clone()));
        let sentinel = Arc::new(HealthSentinel::new(
            config.health.clone(),
            session.clone(),
            store.clone(),
            clock.clone(),
        ));

        let cascade = (!providers.is_empty() || config.cascade.terminal_fallback).then(|| {
            let terminal = config
                .cascade
                .terminal_fallback
                .then(|| DeterministicFallback::new(clock.clone()));
            let recorder = SyncJobRecorder::new(store.clone(), clock.clone(), config.cascade.audit_timeout);
            Arc::new(ProviderCascade::new(
                providers,
                terminal,
                config.cascade.provider_breaker,
                clock.clone(),
                store.clone(),
                recorder,
                metrics.clone(),
            ))
        });

        let freshness = FreshnessCheck::new(config.freshness.clone(), store.clone(), clock.clone());
        let query = Arc::new(ResilientQueryGateway::new(
            config.query.clone(),
            store,
            freshness,
            cascade.clone(),
            clock,
            metrics.clone(),
        ));

        Self {
            config,
            metrics,
            hub,
            session,
            pacer,
            heartbeat,
            sentinel,
            query,
            cascade,
            scheduled_sync: PeriodicTask::new("scheduled-sync"),
            event_pump: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Route one broker event. A fresh connection re-queues the watch list
    /// and whatever the last disconnect dropped.
    pub fn ingest(&self, event: GatewayEvent) {
        if event == GatewayEvent::Connected {
            let mut queued = 0;
            for symbol in self.config.watch_list.iter().cloned().chain(self.session.take_lapsed()) {
                if self.pacer.queue_symbol(symbol) {
                    queued += 1;
                }
            }
            info!(queued, "Broker connected, subscriptions queued");
        }
        self.session.handle_event(event);
    }

    /// Connect and start every periodic task. Returns false if already
    /// running. A failed initial connect is left to the reconnect loop.
    pub async fn start(self: &Arc<Self>, events: mpsc::UnboundedReceiver<GatewayEvent>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.spawn_event_pump(events);
        if self.session.connect().await.is_err() {
            warn!(
                retry_secs = self.config.broker.reconnect_interval.as_secs(),
                "Initial broker connection failed, reconnect loop will retry"
            );
        }

        self.session.start_reconnect();
        self.pacer.start();
        self.heartbeat.start();
        self.sentinel.start();
        self.start_scheduled_sync();

        info!(watch_list = self.config.watch_list.len(), "Market-data feed started");
        true
    }

    /// Stop every task and disconnect. Safe to call any number of times.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduled_sync.stop();
        self.sentinel.stop();
        self.heartbeat.stop();
        self.pacer.stop();
        self.session.stop_reconnect();
        self.session.disconnect().await;
        if let Some(pump) = self.event_pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
        info!("Market-data feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<GatewayEvent>) {
        let feed = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                feed.ingest(event);
            }
            debug!("Broker event stream closed");
        });
        *self.event_pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn start_scheduled_sync(&self) {
        let (Some(period), Some(cascade)) = (self.config.cascade.sync_interval, self.cascade.clone()) else {
            return;
        };
        let watch_list = self.config.watch_list.clone();
        self.scheduled_sync.start(period, move || {
            let cascade = Arc::clone(&cascade);
            let watch_list = watch_list.clone();
            async move {
                cascade.run(&watch_list, SyncJobType::ScheduledSync).await;
            }
        });
        info!(period_secs = period.as_secs(), "Scheduled sync enabled");
    }

    /// Queue a subscription for a raw symbol. `Ok(false)` if already pending.
    pub fn queue_subscription(&self, raw: &str) -> Result<(Symbol, bool), FeedError> {
        let symbol = Symbol::parse(raw)?;
        let queued = self.pacer.queue_symbol(symbol.clone());
        Ok((symbol, queued))
    }

    /// Run the cascade on demand. An empty request syncs the watch list.
    pub async fn manual_sync<S: AsRef<str>>(&self, raw: &[S]) -> Result<CascadeReport, FeedError> {
        let cascade = self.cascade.as_ref().ok_or_else(|| FeedError::Provider {
            provider: "cascade".to_string(),
            reason: "no providers configured".to_string(),
        })?;
        let mut symbols: Vec<Symbol> = raw.iter().filter_map(|s| Symbol::parse(s.as_ref()).ok()).collect();
        if symbols.is_empty() {
            symbols = self.config.watch_list.clone();
        }
        Ok(cascade.run(&symbols, SyncJobType::ManualSync).await)
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    pub fn hub(&self) -> &Arc<TickFanoutHub> {
        &self.hub
    }

    pub fn session(&self) -> &Arc<GatewaySession> {
        &self.session
    }

    pub fn pacer(&self) -> &Arc<SubscriptionPacer> {
        &self.pacer
    }

    pub fn query(&self) -> &Arc<ResilientQueryGateway> {
        &self.query
    }

    pub fn cascade(&self) -> Option<&Arc<ProviderCascade>> {
        self.cascade.as_ref()
    }
}
