//! Tick fan-out to downstream subscribers
//!
//! The hub exclusively owns the subscriber set. A message is serialized
//! once and handed to every OPEN subscriber; a failed send only affects
//! that subscriber, which is logged and deregistered.
//!
//! Each connection gets a bounded outbound queue ([`ChannelSink`]). A queue
//! that is full (lagging client) or closed counts as a failed send.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use types::ids::SubscriberId;
use types::market::TickMessage;

use crate::clock::Clock;
use crate::config::FanoutConfig;
use crate::metrics::FeedMetrics;

/// Serialized payload shared by every subscriber of one broadcast.
pub type Payload = Arc<str>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Per-connection send half of the downstream transport.
pub trait SubscriberSink: Send + Sync {
    fn send(&self, payload: Payload) -> Result<(), SinkError>;
}

/// Bounded queue drained by the connection's writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<Payload>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl SubscriberSink for ChannelSink {
    fn send(&self, payload: Payload) -> Result<(), SinkError> {
        self.tx.try_send(payload).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Open,
    Closed,
}

/// Connection metadata kept next to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub state: SubscriberState,
    pub connected_at: DateTime<Utc>,
    pub last_pong: DateTime<Utc>,
    pub messages_sent: u64,
}

struct Subscriber {
    sink: Arc<dyn SubscriberSink>,
    info: ConnectionInfo,
}

/// Result of one broadcast.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<SubscriberId>,
}

pub struct TickFanoutHub {
    config: FanoutConfig,
    subscribers: DashMap<SubscriberId, Subscriber>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FeedMetrics>,
}

impl TickFanoutHub {
    pub fn new(config: FanoutConfig, clock: Arc<dyn Clock>, metrics: Arc<FeedMetrics>) -> Self {
        Self {
            config,
            subscribers: DashMap::new(),
            clock,
            metrics,
        }
    }

    /// Register a connection with its own bounded queue.
    pub fn register_channel(&self) -> (SubscriberId, mpsc::Receiver<Payload>) {
        let (sink, rx) = ChannelSink::new(self.config.queue_capacity);
        (self.register(Arc::new(sink)), rx)
    }

    pub fn register(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = SubscriberId::new();
        let now = self.clock.now();
        self.subscribers.insert(
            id,
            Subscriber {
                sink,
                info: ConnectionInfo {
                    state: SubscriberState::Open,
                    connected_at: now,
                    last_pong: now,
                    messages_sent: 0,
                },
            },
        );
        self.publish_count();
        debug!(subscriber_id = %id, total = self.subscribers.len(), "Subscriber connected");
        id
    }

    pub fn deregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            self.publish_count();
            debug!(subscriber_id = %id, total = self.subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Stop delivering to a connection that is closing.
    pub fn mark_closed(&self, id: SubscriberId) {
        if let Some(mut sub) = self.subscribers.get_mut(&id) {
            sub.info.state = SubscriberState::Closed;
        }
        self.publish_count();
    }

    pub fn record_pong(&self, id: SubscriberId) {
        if let Some(mut sub) = self.subscribers.get_mut(&id) {
            sub.info.last_pong = self.clock.now();
        }
    }

    pub fn connection_info(&self, id: SubscriberId) -> Option<ConnectionInfo> {
        self.subscribers.get(&id).map(|sub| sub.info.clone())
    }

    /// Number of OPEN subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|sub| sub.info.state == SubscriberState::Open)
            .count()
    }

    /// Serialize once and deliver to every OPEN subscriber.
    pub fn broadcast(&self, message: &TickMessage) -> BroadcastReport {
        let started = Instant::now();
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(err) => {
                error!(%err, "Failed to serialize tick message");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        for mut sub in self.subscribers.iter_mut() {
            if sub.info.state != SubscriberState::Open {
                continue;
            }
            match sub.sink.send(payload.clone()) {
                Ok(()) => {
                    sub.info.messages_sent += 1;
                    report.delivered += 1;
                }
                Err(err) => {
                    warn!(subscriber_id = %sub.key(), %err, "Send failed, dropping subscriber");
                    self.metrics.record_send_failure();
                    report.dropped.push(*sub.key());
                }
            }
        }

        // Removal must wait until the iterator has released its shard locks.
        for id in &report.dropped {
            self.subscribers.remove(id);
        }
        if !report.dropped.is_empty() {
            self.publish_count();
        }

        self.metrics
            .record_broadcast(message.is_heartbeat(), started.elapsed().as_nanos() as u64);
        report
    }

    fn publish_count(&self) {
        self.metrics.set_subscribers(self.subscriber_count() as u64);
    }
}
