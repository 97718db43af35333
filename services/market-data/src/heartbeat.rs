//! Periodic liveness signal through the fan-out hub
//!
//! Dead connections are found by the transport's own ping/pong, not here.

use std::sync::Arc;

use tracing::debug;
use types::market::TickMessage;

use crate::clock::Clock;
use crate::config::HeartbeatConfig;
use crate::fanout::{BroadcastReport, TickFanoutHub};
use crate::task::PeriodicTask;

pub struct HeartbeatBroadcaster {
    config: HeartbeatConfig,
    hub: Arc<TickFanoutHub>,
    clock: Arc<dyn Clock>,
    task: PeriodicTask,
}

impl HeartbeatBroadcaster {
    pub fn new(config: HeartbeatConfig, hub: Arc<TickFanoutHub>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            hub,
            clock,
            task: PeriodicTask::new("heartbeat"),
        }
    }

    pub fn beat(&self) -> BroadcastReport {
        let report = self.hub.broadcast(&TickMessage::heartbeat(self.clock.now_millis()));
        debug!(delivered = report.delivered, dropped = report.dropped.len(), "Heartbeat sent");
        report
    }

    pub fn start(self: &Arc<Self>) {
        let heartbeat = Arc::clone(self);
        self.task.start(self.config.interval, move || {
            let heartbeat = Arc::clone(&heartbeat);
            async move {
                heartbeat.beat();
            }
        });
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}
