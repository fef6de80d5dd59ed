//! Periodic wallet balance snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tokio::time::{interval, MissedTickBehavior};
use tracing::warn;

use crate::error::ExecutionError;
use crate::rpc_manager::ChainGateway;
use crate::structured_logging::EventSink;
use crate::types::PortfolioSnapshot;

pub async fn take_snapshot(
    gateway: &dyn ChainGateway,
    wallet: &Pubkey,
) -> Result<PortfolioSnapshot, ExecutionError> {
    let sol_lamports = gateway.get_balance(wallet).await?;
    Ok(PortfolioSnapshot {
        wallet: wallet.to_string(),
        sol_lamports,
        timestamp: Utc::now(),
    })
}

/// Report a snapshot to `sink` every `every`, starting immediately. Runs until aborted.
pub async fn run_snapshots(
    gateway: Arc<dyn ChainGateway>,
    wallet: Pubkey,
    sink: Arc<dyn EventSink>,
    every: Duration,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match take_snapshot(gateway.as_ref(), &wallet).await {
            Ok(snapshot) => sink.snapshot(&snapshot),
            Err(e) => warn!(wallet = %wallet, error = %e, "portfolio snapshot failed"),
        }
    }
}
