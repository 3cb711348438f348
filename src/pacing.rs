//! Global request pacing.
//!
//! One [`Pacer`] is shared by every worker. It meters generation requests
//! with a token bucket (`requests_per_minute`, `burst`) and, after
//! `max_consecutive_failures` markers fail in a row, holds all workers for
//! `failure_cooldown_secs` before the next request.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::config::PacingConfig;
use crate::guard::{RunGuard, StopReason};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

#[derive(Debug)]
pub struct Pacer {
    /// Tokens per second; `None` disables rate limiting.
    rate: Option<f64>,
    capacity: f64,
    max_consecutive_failures: u32,
    cooldown: Duration,
    state: Mutex<Bucket>,
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        let rate = (config.requests_per_minute > 0)
            .then(|| f64::from(config.requests_per_minute) / 60.0);
        let capacity = f64::from(config.burst.max(1));
        Self {
            rate,
            capacity,
            max_consecutive_failures: config.max_consecutive_failures,
            cooldown: Duration::from_secs(config.failure_cooldown_secs),
            state: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
                consecutive_failures: 0,
                cooldown_until: None,
            }),
        }
    }

    /// No rate limit and no failure cooldown.
    pub fn unlimited() -> Self {
        Self::new(&PacingConfig {
            requests_per_minute: 0,
            burst: 1,
            max_consecutive_failures: 0,
            failure_cooldown_secs: 0,
        })
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self, guard: &RunGuard) -> Result<(), StopReason> {
        loop {
            if let Some(reason) = guard.stop_reason() {
                return Err(reason);
            }

            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match state.cooldown_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        state.cooldown_until = None;
                        match self.rate {
                            None => return Ok(()),
                            Some(rate) => {
                                let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
                                state.tokens = (state.tokens + elapsed * rate).min(self.capacity);
                                state.refilled_at = now;
                                if state.tokens >= 1.0 {
                                    state.tokens -= 1.0;
                                    return Ok(());
                                }
                                Duration::from_secs_f64((1.0 - state.tokens) / rate)
                            }
                        }
                    }
                }
            };

            guard.sleep(wait).await?;
        }
    }

    pub async fn record_success(&self) {
        self.state.lock().await.consecutive_failures = 0;
    }

    pub async fn record_failure(&self) {
        if self.max_consecutive_failures == 0 {
            return;
        }
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "too many consecutive failures, cooling down"
            );
            state.consecutive_failures = 0;
            state.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }
}
