//! Runs every strategy on its own schedule.
//!
//! One tokio task per strategy: execute, report, sleep, repeat. Retryable failures are retried
//! inside the task under the configured policy, so a strategy that is backing off never delays
//! another. A panicking strategy fails its cycle and keeps its schedule.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ExecutionError;
use crate::retry::{retry_with, RetryPolicy};
use crate::strategies::Strategy;
use crate::structured_logging::EventSink;
use crate::types::{ExecutionOutcome, Phase};
use crate::wallet::Wallet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub interval: Duration,
    pub policy: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            policy: RetryPolicy::default(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn panic_to_error<T>(
    r: Result<Result<T, ExecutionError>, Box<dyn std::any::Any + Send>>,
) -> Result<T, ExecutionError> {
    r.unwrap_or_else(|p| Err(ExecutionError::Panicked(panic_message(p))))
}

#[derive(Debug, Clone)]
pub struct Executor {
    wallet: Arc<Wallet>,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(wallet: Arc<Wallet>, sink: Arc<dyn EventSink>, config: ExecutorConfig) -> Self {
        Self {
            wallet,
            sink,
            config,
        }
    }

    /// One scheduled cycle of `strategy`, retries included. Never fails; the outcome carries the
    /// error instead.
    pub async fn run_cycle(&self, strategy: &dyn Strategy) -> ExecutionOutcome {
        let name = strategy.name();
        self.sink.phase(name, Phase::Idle);

        let (result, attempts) = retry_with(
            &self.config.policy,
            |_| {
                AssertUnwindSafe(strategy.execute(&self.wallet))
                    .catch_unwind()
                    .map(panic_to_error)
            },
            ExecutionError::is_retryable,
            |attempt, e, will_retry| {
                warn!(
                    strategy = %name,
                    attempt,
                    error = %e,
                    kind = e.kind(),
                    will_retry,
                    "strategy attempt failed"
                );
            },
        )
        .await;

        let outcome = match result {
            Ok(report) => {
                self.sink.phase(name, Phase::Confirmed);
                ExecutionOutcome {
                    strategy: name.to_string(),
                    success: true,
                    attempts,
                    report: Some(report),
                    error: None,
                    needs_reconciliation: false,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                let e = e.exhausted_after(attempts);
                self.sink.phase(name, Phase::Failed);
                ExecutionOutcome {
                    strategy: name.to_string(),
                    success: false,
                    attempts,
                    report: None,
                    needs_reconciliation: e.needs_reconciliation(),
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                }
            }
        };
        self.sink.outcome(&outcome);
        outcome
    }

    /// Start one looping task per strategy. Aborting the returned set stops them; a submission in
    /// flight at that moment is not rolled back.
    pub fn spawn(&self, strategies: Vec<Arc<dyn Strategy>>) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for strategy in strategies {
            let executor = self.clone();
            tasks.spawn(async move {
                info!(strategy = %strategy.name(), interval_secs = executor.config.interval.as_secs(), "strategy scheduled");
                loop {
                    executor.run_cycle(strategy.as_ref()).await;
                    sleep(executor.config.interval).await;
                }
            });
        }
        tasks
    }
}
