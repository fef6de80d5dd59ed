use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single strategy invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Selecting,
    Building,
    Submitting,
    Confirmed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Selecting => "selecting",
            Phase::Building => "building",
            Phase::Submitting => "submitting",
            Phase::Confirmed => "confirmed",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One historical price bar, ordered time-ascending by the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    pub close: f64,
    /// Bar open time in milliseconds since the epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultAction {
    Deposit,
    Withdraw,
}

/// What a successful strategy invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyReport {
    Transaction {
        action: &'static str,
        target: String,
        signature: String,
    },
    EvmTransactions {
        action: &'static str,
        target: String,
        tx_hashes: Vec<String>,
    },
    VaultTransfer {
        action: VaultAction,
        vault: String,
        apy: f64,
        reference: String,
    },
    Signal {
        signal: Signal,
        short_sma: f64,
        long_sma: f64,
    },
}

/// Result of one scheduled cycle, handed to the sink and then dropped.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub strategy: String,
    pub success: bool,
    pub attempts: usize,
    pub report: Option<StrategyReport>,
    pub error: Option<String>,
    /// Set when the last submission may still land and must be reconciled by hand.
    pub needs_reconciliation: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub wallet: String,
    pub sol_lamports: u64,
    pub timestamp: DateTime<Utc>,
}
