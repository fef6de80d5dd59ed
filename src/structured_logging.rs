//! Event sink handed to the executor and every strategy.
//!
//! Sinks are fire-and-forget: a method returns immediately and never fails. The default
//! `TracingSink` turns events into structured `tracing` records.

use tracing::{info, warn};

use crate::types::{ExecutionOutcome, Phase, PortfolioSnapshot, StrategyReport};

pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Free-form progress line from a strategy.
    fn progress(&self, strategy: &str, message: &str);

    fn phase(&self, strategy: &str, phase: Phase);

    fn outcome(&self, outcome: &ExecutionOutcome);

    fn snapshot(&self, snapshot: &PortfolioSnapshot);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn progress(&self, strategy: &str, message: &str) {
        info!(strategy = %strategy, "{}", message);
    }

    fn phase(&self, strategy: &str, phase: Phase) {
        tracing::debug!(strategy = %strategy, phase = %phase, "phase change");
    }

    fn outcome(&self, outcome: &ExecutionOutcome) {
        if outcome.success {
            info!(
                strategy = %outcome.strategy,
                attempts = outcome.attempts,
                report = %outcome.report.as_ref().map(describe).unwrap_or_default(),
                "strategy cycle succeeded"
            );
        } else {
            warn!(
                strategy = %outcome.strategy,
                attempts = outcome.attempts,
                error = %outcome.error.as_deref().unwrap_or("unknown"),
                needs_reconciliation = outcome.needs_reconciliation,
                "strategy cycle failed"
            );
        }
    }

    fn snapshot(&self, snapshot: &PortfolioSnapshot) {
        info!(
            wallet = %snapshot.wallet,
            sol = snapshot.sol_lamports as f64 / 1e9,
            "portfolio snapshot"
        );
    }
}

/// One-line summary of a report for log output.
pub fn describe(report: &StrategyReport) -> String {
    match report {
        StrategyReport::Transaction {
            action,
            target,
            signature,
        } => format!("{action} {target} sig={signature}"),
        StrategyReport::EvmTransactions {
            action,
            target,
            tx_hashes,
        } => format!("{action} {target} txs={}", tx_hashes.join(",")),
        StrategyReport::VaultTransfer {
            action,
            vault,
            apy,
            reference,
        } => format!("{action:?} vault {vault} apy={apy:.2}% ref={reference}"),
        StrategyReport::Signal {
            signal,
            short_sma,
            long_sma,
        } => format!("{signal:?} short_sma={short_sma:.4} long_sma={long_sma:.4}"),
    }
}
