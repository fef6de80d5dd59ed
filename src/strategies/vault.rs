//! Hyperliquid vault rotation: deposit into the best-yielding configured vault, or withdraw
//! from it once its yield drops below the stop-loss.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::config::VaultConfig;
use crate::error::ExecutionError;
use crate::market_selector::{select_best, Candidate, SelectionCriterion};
use crate::sources::{VaultDetails, VaultVenue};
use crate::structured_logging::EventSink;
use crate::types::{Phase, StrategyReport, VaultAction};
use crate::wallet::Wallet;

use super::Strategy;

/// Withdraw strictly below the threshold, deposit at or above it.
pub fn decide(apy: f64, stop_loss_apy: f64) -> VaultAction {
    if apy < stop_loss_apy {
        VaultAction::Withdraw
    } else {
        VaultAction::Deposit
    }
}

#[derive(Debug)]
pub struct VaultStrategy {
    config: VaultConfig,
    venue: Arc<dyn VaultVenue>,
    sink: Arc<dyn EventSink>,
}

impl VaultStrategy {
    pub fn new(config: VaultConfig, venue: Arc<dyn VaultVenue>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            venue,
            sink,
        }
    }

    /// Details of every configured vault that answered; failures are logged and skipped.
    async fn vaults(&self) -> Vec<VaultDetails> {
        let lookups = self
            .config
            .vaults
            .iter()
            .map(|vault| self.venue.vault_details(vault));
        join_all(lookups)
            .await
            .into_iter()
            .zip(&self.config.vaults)
            .filter_map(|(result, vault)| match result {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!(strategy = %self.config.name, vault = %vault, error = %e, "skipping vault");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl Strategy for VaultStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, _wallet: &Wallet) -> Result<StrategyReport, ExecutionError> {
        let name = self.config.name.as_str();
        self.sink.phase(name, Phase::Selecting);

        let candidates = self
            .vaults()
            .await
            .into_iter()
            .map(|v| Candidate::new(v.address.clone(), v.apy, v.tvl, v))
            .collect();
        let best = select_best(candidates, SelectionCriterion::HighestYield)?;
        let action = decide(best.apy, self.config.stop_loss_apy);
        self.sink.progress(
            name,
            &format!(
                "best vault {} ({}) at {:.2}% apy vs stop-loss {:.2}%: {:?}",
                best.payload.name, best.id, best.apy, self.config.stop_loss_apy, action
            ),
        );

        self.sink.phase(name, Phase::Submitting);
        let reference = match action {
            VaultAction::Deposit => self.venue.deposit(&best.id, self.config.amount_usd).await?,
            VaultAction::Withdraw => self.venue.withdraw(&best.id, self.config.amount_usd).await?,
        };

        Ok(StrategyReport::VaultTransfer {
            action,
            vault: best.id,
            apy: best.apy,
            reference,
        })
    }
}
