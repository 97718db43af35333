//! Cancellable periodic tasks
//!
//! Reconnect, pacer drain, heartbeat and health checks all run as a
//! [`PeriodicTask`]: a tokio interval loop with explicit start and an
//! idempotent stop. Each tick body is awaited before the next tick is
//! taken, and missed ticks are skipped rather than bunched up.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub struct PeriodicTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Run `tick` every `period`, first after one full period.
    ///
    /// Returns false if the task is already running.
    pub fn start<F, Fut>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let name = self.name;
        *handle = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");
            loop {
                interval.tick().await;
                tick().await;
            }
        }));
        true
    }

    /// Cancel the task. Safe to call any number of times.
    pub fn stop(&self) {
        let taken = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = taken {
            handle.abort();
            debug!(task = self.name, "Periodic task stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
