//! Bounded exponential backoff for service calls.
//!
//! A policy with `max_retries = n` makes at most `n + 1` calls. The delay
//! before retry `k` (1-based) is `base_delay * 2^(k-1)`, capped at
//! `max_delay`, with ±10% jitter.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{GenerateError, UploadError};
use crate::guard::{RunGuard, StopReason};
use crate::pacing::Pacer;

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for GenerateError {
    fn is_retryable(&self) -> bool {
        GenerateError::is_retryable(self)
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        UploadError::is_retryable(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            delay.mul_f64(rand::rng().random_range(0.9..1.1))
        } else {
            delay
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Not retryable; returned after the attempt that produced it.
    Permanent { error: E, attempts: u32 },
    /// Still failing after `max_retries` retries.
    Exhausted { error: E, attempts: u32 },
    /// The run stopped while waiting.
    Stopped(StopReason),
}

/// Run `op` until it succeeds, fails permanently, exhausts the policy, or
/// the run stops. When a pacer is given, every attempt first takes a token.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    guard: &RunGuard,
    pacer: Option<&Pacer>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(pacer) = pacer {
            pacer.acquire(guard).await.map_err(RetryError::Stopped)?;
        }

        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(RetryError::Permanent {
                error,
                attempts: attempt,
            });
        }
        if attempt > policy.max_retries {
            return Err(RetryError::Exhausted {
                error,
                attempts: attempt,
            });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, ?delay, error = %error, "transient failure, backing off");
        guard.sleep(delay).await.map_err(RetryError::Stopped)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            jitter: false,
        }
    }

    fn rate_limited() -> GenerateError {
        GenerateError::RateLimited {
            detail: "429".to_string(),
        }
    }

    #[test]
    fn test_delays_double_and_cap() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(4), Duration::from_secs(40));
        assert_eq!(p.delay_for(6), Duration::from_secs(120));
        assert_eq!(p.delay_for(40), Duration::from_secs(120));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let p = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(60));
        for _ in 0..50 {
            let d = p.delay_for(1);
            assert!(d >= Duration::from_secs(9) && d <= Duration::from_secs(11));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exactly_max_times_then_exhausts() {
        let calls = AtomicU32::new(0);
        let guard = RunGuard::new(None);
        let result: Result<(), _> = run_with_retry(&policy(3), &guard, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                error: rate_limited(),
                attempts: 4
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let guard = RunGuard::new(None);
        let result: Result<(), _> = run_with_retry(&policy(3), &guard, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerateError::InvalidPrompt {
                    detail: "blocked".to_string(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let guard = RunGuard::new(None);
        let result = run_with_retry(&policy(3), &guard, None, |attempt| async move {
            if attempt < 3 {
                Err(rate_limited())
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_backoff() {
        let guard = RunGuard::new(Some(Duration::from_secs(7)));
        let result: Result<(), _> =
            run_with_retry(&policy(5), &guard, None, |_| async { Err(rate_limited()) }).await;
        assert_eq!(result, Err(RetryError::Stopped(StopReason::Timeout)));
    }
}
