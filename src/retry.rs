//! Bounded retry shared by the executor, the submitter and gateway reads.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff, FixedInterval};
use tokio_retry::RetryIf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// Doubles from `base_ms` up to `max_delay_ms`, with jitter.
    Exponential { base_ms: u64, max_delay_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed { delay_ms: 5_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy with no delay between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Backoff::Fixed { delay_ms: 0 })
    }

    /// Delays between consecutive attempts; one fewer than `max_attempts`.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let retries = self.max_attempts.saturating_sub(1);
        match self.backoff {
            Backoff::Fixed { delay_ms } => {
                Box::new(FixedInterval::from_millis(delay_ms).take(retries))
            }
            Backoff::Exponential {
                base_ms,
                max_delay_ms,
            } => Box::new(
                ExponentialBackoff::from_millis(2)
                    .factor((base_ms / 2).max(1))
                    .max_delay(Duration::from_millis(max_delay_ms))
                    .map(jitter)
                    .take(retries),
            ),
        }
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or the policy's
/// attempt bound is reached. `op` receives the 1-based attempt number; `on_failure` sees every
/// failed attempt together with whether another attempt follows.
///
/// Returns the final result and the number of attempts made.
pub async fn retry_with<T, E, F, Fut, R, L>(
    policy: &RetryPolicy,
    mut op: F,
    mut is_retryable: R,
    mut on_failure: L,
) -> (Result<T, E>, usize)
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
    L: FnMut(usize, &E, bool),
{
    let max_attempts = policy.max_attempts.max(1);
    let attempts = AtomicUsize::new(0);

    let result = RetryIf::start(
        policy.delays(),
        || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            op(attempt)
        },
        |e: &E| {
            let attempt = attempts.load(Ordering::SeqCst);
            let retry = is_retryable(e) && attempt < max_attempts;
            on_failure(attempt, e, retry);
            retry
        },
    )
    .await;

    (result, attempts.load(Ordering::SeqCst))
}
