//! Per-channel request governor.
//!
//! Combines a local sliding-window ceiling (at most `max_requests` in any
//! `window`) with reactive suspension when the remote side answers with a
//! throttling response. The source and sink each own an independent instance.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

pub struct RateGovernor {
    name: String,
    max_requests: usize,
    window: Duration,
    throttle_jitter: Duration,
    state: Mutex<RateWindow>,
}

/// Timestamps of requests still inside the window, plus any server-imposed pause
#[derive(Debug, Default)]
struct RateWindow {
    sent: VecDeque<Instant>,
    suspended_until: Option<Instant>,
}

impl RateWindow {
    /// Take a slot at `now`, or return the instant at which one may free up.
    fn try_acquire(
        &mut self,
        now: Instant,
        max_requests: usize,
        window: Duration,
    ) -> Result<(), Instant> {
        if let Some(until) = self.suspended_until {
            if now < until {
                return Err(until);
            }
            self.suspended_until = None;
        }

        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= window {
                self.sent.pop_front();
            } else {
                break;
            }
        }

        if self.sent.len() < max_requests {
            self.sent.push_back(now);
            return Ok(());
        }

        match self.sent.front() {
            Some(&oldest) => Err(oldest + window),
            None => Err(now + window),
        }
    }
}

impl RateGovernor {
    pub fn new(name: &str, config: &RateLimitConfig) -> Self {
        Self {
            name: name.to_string(),
            max_requests: config.max_requests.max(1) as usize,
            window: config.window(),
            throttle_jitter: config.throttle_jitter(),
            state: Mutex::new(RateWindow::default()),
        }
    }

    /// Wait until a request slot is free under the local ceiling and any
    /// throttling pause has elapsed, then claim exactly one slot.
    pub async fn acquire(&self) {
        loop {
            let ready_at = {
                let mut state = self.state.lock().await;
                match state.try_acquire(Instant::now(), self.max_requests, self.window) {
                    Ok(()) => return,
                    Err(at) => at,
                }
            };
            debug!(
                "Rate governor '{}' waiting {:?} for a request slot",
                self.name,
                ready_at.saturating_duration_since(Instant::now())
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Suspend the channel for `retry_after` plus the fixed jitter. A longer
    /// pause already in effect is kept.
    pub async fn on_throttled(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after + self.throttle_jitter;
        let mut state = self.state.lock().await;
        let until = match state.suspended_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        state.suspended_until = Some(until);
        warn!(
            "Rate governor '{}' throttled by remote: pausing for {:?} (+{:?} jitter)",
            self.name, retry_after, self.throttle_jitter
        );
    }
}
