//! Backoff, retry and timeout utilities.
//!
//! [`BackoffPolicy`] is shared by the REST client (bounded retries through
//! [`retry_async`]) and the frame-log stream (unbounded reconnects).

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Delay growth between consecutive attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay used before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for delay growth, jitter excluded.
    pub max_delay: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// Reconnect policy matching the defaults of browser reconnecting
    /// websocket transports: 1s, growing by 1.3x up to 10s, plus up to 4s
    /// of jitter.
    pub fn reconnect() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.3,
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_secs(4),
        }
    }

    /// Fixed delay without growth or jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: Duration::ZERO,
        }
    }

    /// Computes the delay to apply before the given retry attempt.
    ///
    /// `attempt` is 1-based; `0` is treated as `1`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.base_delay_for_attempt(attempt)
            .saturating_add(jitter_duration(self.jitter, attempt))
    }

    /// Delay for `attempt` without jitter.
    pub fn base_delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };

        let mut delay = std::cmp::min(self.initial_delay, self.max_delay);
        for _ in 1..attempt {
            if delay >= self.max_delay {
                break;
            }
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * multiplier)
                .map_or(self.max_delay, |grown| std::cmp::min(grown, self.max_delay));
        }
        delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::reconnect()
    }
}

/// Policy controlling bounded retry attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay schedule between attempts.
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffPolicy::fixed(Duration::ZERO),
        }
    }

    /// Computes the delay to apply before the given retry attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }
}


/// Executes an async operation with retry behavior controlled by `policy`.
///
/// `op` receives the 1-based attempt number and must return a future that
/// resolves to the operation result. `should_retry` determines whether each
/// error is retryable.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}
