//! Retry-with-backoff shared by the orchestrator and the upload sink.
//!
//! The operation reports each attempt as a [`RetryAction`], so the decision
//! whether an error is worth another attempt stays with the caller, while the
//! attempt budget and the delays live in one visible [`RetryPolicy`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Longest server-requested wait honoured before the next attempt.
pub const MAX_SERVER_DELAY: Duration = Duration::from_secs(300);

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base × n` after failed attempt `n`.
    Linear,
    /// `base × 2ⁿ` after failed attempt `n`.
    Exponential,
}

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = match self.backoff {
            Backoff::Linear => attempt,
            // Saturate rather than overflow for absurd attempt numbers.
            Backoff::Exponential => 1u32.checked_shl(attempt).unwrap_or(u32::MAX),
        };
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Outcome of a single attempt.
pub enum RetryAction<T, E> {
    Success(T),
    /// Transient failure; try again if budget remains.
    Retry(E),
    /// Transient failure where the other side asked for a minimum wait
    /// (e.g. `Retry-After`). The longer of that and the policy's delay wins,
    /// capped at [`MAX_SERVER_DELAY`].
    RetryAfter(E, Duration),
    /// Permanent failure; stop now.
    Fail(E),
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent. The closure receives the 1-based attempt number.
///
/// Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= max {
                    return Err(err);
                }
                wait(policy.delay_for(attempt), attempt, max, &err).await;
                attempt += 1;
            }
            RetryAction::RetryAfter(err, hint) => {
                if attempt >= max {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt).max(hint.min(MAX_SERVER_DELAY));
                wait(delay, attempt, max, &err).await;
                attempt += 1;
            }
        }
    }
}

async fn wait<E: Display>(delay: Duration, attempt: u32, max: u32, err: &E) {
    warn!(
        attempt,
        max,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "Retrying after transient error"
    );
    tokio::time::sleep(delay).await;
}
