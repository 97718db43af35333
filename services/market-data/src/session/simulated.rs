//! In-process broker for paper/demo runs
//!
//! Emits a seeded random walk of bid/ask/last prices per subscription, so a
//! feed can be exercised end to end without an upstream gateway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use types::errors::FeedError;
use types::ids::TickerId;
use types::market::{ContractSpec, TickValue, UpstreamTick};

use super::{BrokerClient, GatewayEvent};
use crate::cascade::deterministic::seed_for;

/// Upstream tick-type codes used by the simulator.
const FIELD_BID: u32 = 1;
const FIELD_ASK: u32 = 2;
const FIELD_LAST: u32 = 4;
const FIELD_VOLUME: u32 = 8;

pub struct SimulatedBroker {
    events: mpsc::UnboundedSender<GatewayEvent>,
    tick_interval: Duration,
    connected: Arc<AtomicBool>,
    streams: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedBroker {
    pub fn new(events: mpsc::UnboundedSender<GatewayEvent>, tick_interval: Duration) -> Self {
        Self {
            events,
            tick_interval,
            connected: Arc::new(AtomicBool::new(false)),
            streams: Mutex::new(Vec::new()),
        }
    }

    fn stop_streams(&self) {
        for handle in self.streams.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    async fn connect(&self, host: &str, port: u16, client_id: i32) -> Result<(), FeedError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            debug!(host, port, client_id, "Simulated broker session opened");
            let _ = self.events.send(GatewayEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.stop_streams();
            let _ = self.events.send(GatewayEvent::Disconnected);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn request_market_data(
        &self,
        ticker_id: TickerId,
        contract: &ContractSpec,
    ) -> Result<(), FeedError> {
        if !self.is_connected() {
            return Err(FeedError::Connection("simulated broker not connected".to_string()));
        }

        let mut rng = ChaCha8Rng::from_seed(seed_for(&contract.symbol));
        let mut last: f64 = rng.gen_range(50.0..500.0);
        let events = self.events.clone();
        let connected = Arc::clone(&self.connected);
        let period = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while connected.load(Ordering::SeqCst) {
                interval.tick().await;
                last *= 1.0 + rng.gen_range(-0.002..0.002);
                let spread = last * 0.0005;
                let ticks = [
                    (FIELD_BID, TickValue::Price(to_price(last - spread))),
                    (FIELD_ASK, TickValue::Price(to_price(last + spread))),
                    (FIELD_LAST, TickValue::Price(to_price(last))),
                    (FIELD_VOLUME, TickValue::Size(Decimal::from(rng.gen_range(1u32..500)))),
                ];
                for (field, value) in ticks {
                    let event = GatewayEvent::Tick(UpstreamTick { ticker_id, field, value });
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
        });
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }
}

impl Drop for SimulatedBroker {
    fn drop(&mut self) {
        self.stop_streams();
    }
}

fn to_price(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or_default().round_dp(2)
}
