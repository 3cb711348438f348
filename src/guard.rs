//! Run-wide stop conditions: wall-clock budget, fatal abort, interrupt.
//!
//! Workers consult the guard before each marker and each stage, and sleep
//! through it so that backoff and pacing waits end early when the run is
//! stopped.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::SkipReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Timeout,
    Aborted,
    Interrupted,
}

impl From<StopReason> for SkipReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Timeout => SkipReason::RunTimeout,
            StopReason::Aborted => SkipReason::Aborted,
            StopReason::Interrupted => SkipReason::Interrupted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunGuard {
    deadline: Option<Instant>,
    abort: CancellationToken,
    interrupt: CancellationToken,
}

impl RunGuard {
    /// Start the clock now; `None` means no wall-clock budget.
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            deadline: budget.map(|b| Instant::now() + b),
            abort: CancellationToken::new(),
            interrupt: CancellationToken::new(),
        }
    }

    /// Use `token` as the interrupt signal (e.g. cancelled on Ctrl-C).
    pub fn with_interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = token;
        self
    }

    /// Stop every worker after a fatal error.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.abort.is_cancelled() {
            Some(StopReason::Aborted)
        } else if self.interrupt.is_cancelled() {
            Some(StopReason::Interrupted)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StopReason::Timeout)
        } else {
            None
        }
    }

    /// Sleep for `delay`, waking early if the run stops.
    pub async fn sleep(&self, delay: Duration) -> Result<(), StopReason> {
        if let Some(reason) = self.stop_reason() {
            return Err(reason);
        }
        let wake = Instant::now() + delay;
        let until = match self.deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };
        tokio::select! {
            _ = tokio::time::sleep_until(until) => {}
            _ = self.abort.cancelled() => {}
            _ = self.interrupt.cancelled() => {}
        }
        match self.stop_reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}
