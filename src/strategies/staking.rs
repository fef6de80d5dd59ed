//! Liquid-staking deposit into a Marinade-style program: SOL in, staked-SOL tokens out.

use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::accounts::derive;
use crate::config::StakingConfig;
use crate::error::ExecutionError;
use crate::instructions::{stake_deposit, StakeDepositAccounts};
use crate::structured_logging::EventSink;
use crate::submitter::Submitter;
use crate::types::{Phase, StrategyReport};
use crate::wallet::Wallet;

use super::{resolve_ata, Strategy};

/// Program-derived accounts hanging off the staking state account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakePoolAddresses {
    pub state: Pubkey,
    pub reserve: Pubkey,
    pub st_mint_authority: Pubkey,
    pub liq_pool_sol_leg: Pubkey,
    pub liq_pool_st_leg_authority: Pubkey,
}

impl StakePoolAddresses {
    pub fn derive(program: &Pubkey, state: Option<Pubkey>) -> Result<Self, ExecutionError> {
        let state = match state {
            Some(state) => state,
            None => derive(&[b"state"], program)?.address,
        };
        let pda = |suffix: &[u8]| derive(&[state.as_ref(), suffix], program).map(|d| d.address);
        Ok(Self {
            state,
            reserve: pda(b"reserve")?,
            st_mint_authority: pda(b"st_mint")?,
            liq_pool_sol_leg: pda(b"liq_sol")?,
            liq_pool_st_leg_authority: pda(b"liq_st_sol_authority")?,
        })
    }
}

#[derive(Debug)]
pub struct StakingStrategy {
    config: StakingConfig,
    submitter: Arc<Submitter>,
    sink: Arc<dyn EventSink>,
}

impl StakingStrategy {
    pub fn new(config: StakingConfig, submitter: Arc<Submitter>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            submitter,
            sink,
        }
    }
}

#[async_trait]
impl Strategy for StakingStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, wallet: &Wallet) -> Result<StrategyReport, ExecutionError> {
        let name = self.config.name.as_str();
        self.sink.phase(name, Phase::Selecting);
        let pool = StakePoolAddresses::derive(&self.config.program, self.config.state)?;
        debug!(strategy = %name, state = %pool.state, reserve = %pool.reserve, "derived stake pool accounts");

        self.sink.phase(name, Phase::Building);
        let owner = wallet.pubkey();
        let (mint_to, create) = resolve_ata(
            self.submitter.gateway().as_ref(),
            &owner,
            &owner,
            &self.config.st_mint,
        )
        .await?;

        let mut instructions: Vec<_> = create.into_iter().collect();
        instructions.push(stake_deposit(
            &self.config.program,
            &StakeDepositAccounts {
                state: pool.state,
                st_mint: self.config.st_mint,
                liq_pool_sol_leg: pool.liq_pool_sol_leg,
                liq_pool_st_leg: self.config.liq_pool_st_leg,
                liq_pool_st_leg_authority: pool.liq_pool_st_leg_authority,
                reserve: pool.reserve,
                transfer_from: owner,
                mint_to,
                st_mint_authority: pool.st_mint_authority,
            },
            self.config.lamports,
        )?);
        self.sink.progress(
            name,
            &format!("staking {} SOL into {}", self.config.lamports as f64 / 1e9, pool.state),
        );

        self.sink.phase(name, Phase::Submitting);
        let signature = self
            .submitter
            .submit_and_confirm(name, &instructions, wallet)
            .await?;

        Ok(StrategyReport::Transaction {
            action: "stake_deposit",
            target: pool.state.to_string(),
            signature: signature.to_string(),
        })
    }
}
