//! Outbound subscription pacing
//!
//! Upstream gateways reject clients that subscribe faster than their
//! pacing limit. Requests are queued here, unique by symbol while pending,
//! and a drain tick issues at most one of them per interval in strict FIFO
//! order. A request whose subscribe call fails is logged and dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use types::errors::FeedError;
use types::ids::TickerId;
use types::market::{ContractSpec, Symbol};

use crate::clock::Clock;
use crate::config::PacerConfig;
use crate::session::GatewaySession;
use crate::task::PeriodicTask;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub symbol: Symbol,
    pub contract: ContractSpec,
    pub queued_at: DateTime<Utc>,
}

/// What one drain tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Nothing pending.
    Idle,
    /// A previous drain was still in progress.
    Skipped,
    Issued { symbol: Symbol, ticker_id: TickerId },
    Failed { symbol: Symbol, error: FeedError },
}

#[derive(Default)]
struct PendingQueue {
    order: VecDeque<SubscriptionRequest>,
    symbols: HashSet<Symbol>,
}

pub struct SubscriptionPacer {
    config: PacerConfig,
    session: Arc<GatewaySession>,
    clock: Arc<dyn Clock>,
    pending: Mutex<PendingQueue>,
    draining: AtomicBool,
    next_ticker_id: AtomicU32,
    drain_task: PeriodicTask,
}

/// Clears the in-progress flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SubscriptionPacer {
    pub fn new(config: PacerConfig, session: Arc<GatewaySession>, clock: Arc<dyn Clock>) -> Self {
        let first = config.first_ticker_id;
        Self {
            config,
            session,
            clock,
            pending: Mutex::new(PendingQueue::default()),
            draining: AtomicBool::new(false),
            next_ticker_id: AtomicU32::new(first),
            drain_task: PeriodicTask::new("subscription-pacer"),
        }
    }

    /// Queue a subscription. Returns false if the symbol is already pending
    /// or already has a live upstream subscription.
    pub fn queue_subscription(&self, symbol: Symbol, contract: ContractSpec) -> bool {
        if self.session.is_subscribed(&symbol) {
            debug!(%symbol, "Already subscribed upstream");
            return false;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.symbols.insert(symbol.clone()) {
            debug!(%symbol, "Subscription already pending");
            return false;
        }
        pending.order.push_back(SubscriptionRequest {
            symbol: symbol.clone(),
            contract,
            queued_at: self.clock.now(),
        });
        debug!(%symbol, depth = pending.order.len(), "Subscription queued");
        true
    }

    /// Queue a symbol with its derived contract.
    pub fn queue_symbol(&self, symbol: Symbol) -> bool {
        let contract = ContractSpec::for_symbol(&symbol);
        self.queue_subscription(symbol, contract)
    }

    /// Pending symbols, oldest first.
    pub fn pending(&self) -> Vec<Symbol> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .iter()
            .map(|r| r.symbol.clone())
            .collect()
    }

    /// Pop the oldest request and issue its subscribe call.
    pub async fn drain_once(&self) -> DrainOutcome {
        if self.draining.swap(true, Ordering::Acquire) {
            return DrainOutcome::Skipped;
        }
        let _guard = DrainGuard(&self.draining);

        let request = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(request) = pending.order.pop_front() else {
                return DrainOutcome::Idle;
            };
            pending.symbols.remove(&request.symbol);
            request
        };

        let ticker_id = TickerId::new(self.next_ticker_id.fetch_add(1, Ordering::Relaxed));
        let result = self
            .session
            .subscribe(ticker_id, &request.symbol, &request.contract)
            .await;
        self.session.metrics().record_subscription(result.is_ok());

        match result {
            Ok(()) => DrainOutcome::Issued {
                symbol: request.symbol,
                ticker_id,
            },
            Err(error) => {
                warn!(symbol = %request.symbol, %ticker_id, %error, "Subscribe failed, dropping request");
                DrainOutcome::Failed {
                    symbol: request.symbol,
                    error,
                }
            }
        }
    }

    pub fn start(self: &Arc<Self>) {
        let pacer = Arc::clone(self);
        let started = self.drain_task.start(self.config.drain_interval, move || {
            let pacer = Arc::clone(&pacer);
            async move {
                pacer.drain_once().await;
            }
        });
        if started {
            info!(interval_ms = self.config.drain_interval.as_millis() as u64, "Subscription pacer started");
        }
    }

    pub fn stop(&self) {
        self.drain_task.stop();
    }
}
