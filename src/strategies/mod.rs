//! Strategy trait, shared helpers and construction from configuration.

pub mod lending;
pub mod liquidity;
pub mod moving_average;
pub mod staking;
pub mod vault;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::debug;

use crate::accounts::associated_token_address;
use crate::config::{BaseConfig, StrategyConfig};
use crate::error::ExecutionError;
use crate::evm::EvmGateway;
use crate::instructions::create_associated_token_account_idempotent;
use crate::rpc_manager::{ChainGateway, GatewayError};
use crate::sources::{KlineSource, VaultVenue};
use crate::structured_logging::EventSink;
use crate::submitter::Submitter;
use crate::types::StrategyReport;
use crate::wallet::Wallet;

pub use lending::LendingStrategy;
pub use liquidity::LiquidityStrategy;
pub use moving_average::MovingAverageStrategy;
pub use staking::StakingStrategy;
pub use vault::VaultStrategy;

#[async_trait]
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// One full evaluation: fetch, select, build and (for on-chain strategies) land a transaction.
    async fn execute(&self, wallet: &Wallet) -> Result<StrategyReport, ExecutionError>;
}

/// Associated token account of `owner` for `mint`, plus a create-idempotent instruction when the
/// account does not exist yet.
pub(crate) async fn resolve_ata(
    gateway: &dyn ChainGateway,
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<(Pubkey, Option<Instruction>), ExecutionError> {
    let ata = associated_token_address(owner, mint)?;
    match gateway.get_account(&ata).await {
        Ok(_) => Ok((ata, None)),
        Err(GatewayError::NotFound(_)) => {
            debug!(owner = %owner, mint = %mint, ata = %ata, "token account missing, creating");
            Ok((
                ata,
                Some(create_associated_token_account_idempotent(payer, &ata, owner, mint)),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Handles shared by every strategy built from configuration.
#[derive(Debug, Clone)]
pub struct Dependencies {
    pub submitter: Arc<Submitter>,
    pub evm: Option<Arc<dyn EvmGateway>>,
    pub base: Option<BaseConfig>,
    pub klines: Arc<dyn KlineSource>,
    pub venue: Arc<dyn VaultVenue>,
    pub sink: Arc<dyn EventSink>,
}

pub fn build_strategies(
    configs: &[StrategyConfig],
    deps: &Dependencies,
) -> Result<Vec<Arc<dyn Strategy>>, ExecutionError> {
    configs
        .iter()
        .map(|cfg| build_strategy(cfg, deps))
        .collect()
}

fn build_strategy(
    cfg: &StrategyConfig,
    deps: &Dependencies,
) -> Result<Arc<dyn Strategy>, ExecutionError> {
    let strategy: Arc<dyn Strategy> = match cfg {
        StrategyConfig::Lending(c) => Arc::new(LendingStrategy::new(
            c.clone(),
            deps.submitter.clone(),
            deps.sink.clone(),
        )),
        StrategyConfig::Staking(c) => Arc::new(StakingStrategy::new(
            c.clone(),
            deps.submitter.clone(),
            deps.sink.clone(),
        )),
        StrategyConfig::Liquidity(c) => {
            let (evm, base) = deps.evm.clone().zip(deps.base.as_ref()).ok_or_else(|| {
                ExecutionError::ConfigurationInvalid(format!(
                    "{}: liquidity strategies need a Base gateway",
                    c.name
                ))
            })?;
            Arc::new(LiquidityStrategy::new(
                c.clone(),
                base.position_manager,
                base.factory,
                Duration::from_secs(base.confirm_timeout_secs),
                evm,
                deps.klines.clone(),
                deps.sink.clone(),
            ))
        }
        StrategyConfig::Vault(c) => Arc::new(VaultStrategy::new(
            c.clone(),
            deps.venue.clone(),
            deps.sink.clone(),
        )),
        StrategyConfig::MovingAverage(c) => Arc::new(MovingAverageStrategy::new(
            c.clone(),
            deps.klines.clone(),
            deps.sink.clone(),
        )),
    };
    Ok(strategy)
}
