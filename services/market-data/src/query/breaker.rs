//! Circuit breaker for the query path and for each cascade provider
//!
//! ```text
//! CLOSED ──failures ≥ threshold──▶ OPEN ──cooldown elapsed──▶ HALF-OPEN (one probe)
//!   ▲                                ▲                             │
//!   └──────────── probe succeeds ────┼─────────────────────────────┤
//!                                    └──── probe fails (lastFailureAt = now)
//! ```
//!
//! While a probe is in flight every other call fails fast.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::clock::elapsed_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Permission to make one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Allowed as the single post-cooldown probe.
    Probe,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    is_open: bool,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            failure_count: 0,
            last_failure_at: None,
            is_open: false,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        match (self.is_open, self.probe_in_flight) {
            (false, _) => BreakerState::Closed,
            (true, false) => BreakerState::Open,
            (true, true) => BreakerState::HalfOpen,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    /// Earliest instant a trial call will be admitted; `None` while closed.
    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_open {
            return None;
        }
        let cooldown = chrono::Duration::from_std(self.cooldown).ok()?;
        self.last_failure_at?.checked_add_signed(cooldown)
    }

    /// Decide whether a call may go upstream at `now`.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Admission {
        if !self.is_open {
            return Admission::Allowed;
        }
        if self.probe_in_flight {
            return Admission::Rejected;
        }
        let cooled_down = self
            .last_failure_at
            .map_or(true, |at| elapsed_between(at, now) >= self.cooldown);
        if cooled_down {
            self.probe_in_flight = true;
            info!("Circuit breaker cooldown elapsed, allowing probe");
            Admission::Probe
        } else {
            Admission::Rejected
        }
    }

    /// Give back a probe slot that never reached upstream.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    pub fn record_success(&mut self) {
        if self.is_open {
            info!("Circuit breaker closed");
        }
        self.failure_count = 0;
        self.is_open = false;
        self.probe_in_flight = false;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);
        self.probe_in_flight = false;
        if !self.is_open && self.failure_count >= self.threshold {
            self.is_open = true;
            warn!(failures = self.failure_count, cooldown_s = self.cooldown.as_secs(), "Circuit breaker opened");
        }
    }
}
