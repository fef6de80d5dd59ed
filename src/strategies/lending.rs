//! Deposit into, or redeem from, a reserve of a Solend-layout lending program.
//!
//! Every cycle re-reads all reserves owned by the program, so selection always sees current
//! utilization and liquidity.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::account_layouts::{Reserve, RESERVE_LEN};
use crate::accounts::derive;
use crate::config::LendingConfig;
use crate::error::ExecutionError;
use crate::instructions::{
    lending_deposit, lending_redeem, LendingDepositAccounts, LendingRedeemAccounts,
};
use crate::market_selector::{rank, select_best, Candidate};
use crate::oracle::PythOracle;
use crate::structured_logging::EventSink;
use crate::submitter::Submitter;
use crate::types::{Phase, StrategyReport};
use crate::wallet::Wallet;

use super::{resolve_ata, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LendingAction {
    Deposit,
    Withdraw,
}

#[derive(Debug)]
pub struct LendingStrategy {
    config: LendingConfig,
    submitter: Arc<Submitter>,
    oracle: PythOracle,
    sink: Arc<dyn EventSink>,
}

impl LendingStrategy {
    pub fn new(config: LendingConfig, submitter: Arc<Submitter>, sink: Arc<dyn EventSink>) -> Self {
        let oracle = PythOracle::new(submitter.gateway().clone());
        Self {
            config,
            submitter,
            oracle,
            sink,
        }
    }

    fn wants(&self, reserve: &Reserve) -> bool {
        if let Some(mint) = self.config.mint {
            if reserve.liquidity_mint != mint {
                return false;
            }
        }
        self.config.action == LendingAction::Withdraw
            || self.config.allowed_mints.is_empty()
            || self.config.allowed_mints.contains(&reserve.liquidity_mint)
    }

    /// Decoded reserves of the configured program that this strategy may act on.
    async fn candidates(&self) -> Result<Vec<Candidate<(Pubkey, Reserve)>>, ExecutionError> {
        let accounts = self
            .submitter
            .gateway()
            .get_program_accounts(&self.config.program, Some(RESERVE_LEN as u64))
            .await?;

        let mut candidates = Vec::with_capacity(accounts.len());
        for (address, account) in accounts {
            let reserve = match Reserve::decode(&account.data) {
                Ok(r) => r,
                Err(e) => {
                    warn!(strategy = %self.config.name, reserve = %address, error = %e, "skipping malformed reserve");
                    continue;
                }
            };
            if !self.wants(&reserve) {
                continue;
            }
            candidates.push(Candidate::new(
                address.to_string(),
                reserve.supply_apy(),
                reserve.available_liquidity_usd(),
                (address, reserve),
            ));
        }
        Ok(candidates)
    }
}

#[async_trait]
impl Strategy for LendingStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, wallet: &Wallet) -> Result<StrategyReport, ExecutionError> {
        let name = self.config.name.as_str();
        self.sink.phase(name, Phase::Selecting);

        let candidates = self.candidates().await?;
        if let Some(runner_up) = rank(candidates.clone(), self.config.criterion).get(1) {
            self.sink.progress(
                name,
                &format!("runner-up reserve {} at {:.2}% apy", runner_up.id, runner_up.apy),
            );
        }
        let best = select_best(candidates, self.config.criterion)?;
        let (reserve_address, reserve) = best.payload;
        self.sink.progress(
            name,
            &format!(
                "selected reserve {} ({}) at {:.2}% apy, ${:.0} available",
                reserve_address, reserve.liquidity_mint, best.apy, best.liquidity
            ),
        );

        if self.config.action == LendingAction::Deposit && self.config.require_live_oracle {
            let price = self.oracle.live_price(&reserve.pyth_oracle).await?;
            info!(strategy = %name, oracle = %reserve.pyth_oracle, price, "oracle is live");
        }

        self.sink.phase(name, Phase::Building);
        let owner = wallet.pubkey();
        let gateway = self.submitter.gateway().as_ref();
        let (liquidity_ata, create_liquidity) =
            resolve_ata(gateway, &owner, &owner, &reserve.liquidity_mint).await?;
        let (collateral_ata, create_collateral) =
            resolve_ata(gateway, &owner, &owner, &reserve.collateral_mint).await?;
        let authority = derive(&[reserve.lending_market.as_ref()], &self.config.program)?;

        let mut instructions: Vec<_> = create_liquidity.into_iter().chain(create_collateral).collect();
        let action = match self.config.action {
            LendingAction::Deposit => {
                instructions.push(lending_deposit(
                    &self.config.program,
                    &LendingDepositAccounts {
                        source_liquidity: liquidity_ata,
                        destination_collateral: collateral_ata,
                        reserve: reserve_address,
                        reserve_liquidity_supply: reserve.liquidity_supply,
                        reserve_collateral_mint: reserve.collateral_mint,
                        lending_market: reserve.lending_market,
                        lending_market_authority: authority.address,
                        user_transfer_authority: owner,
                    },
                    self.config.amount,
                )?);
                "lending_deposit"
            }
            LendingAction::Withdraw => {
                instructions.push(lending_redeem(
                    &self.config.program,
                    &LendingRedeemAccounts {
                        source_collateral: collateral_ata,
                        destination_liquidity: liquidity_ata,
                        reserve: reserve_address,
                        reserve_collateral_supply: reserve.collateral_supply,
                        lending_market: reserve.lending_market,
                        lending_market_authority: authority.address,
                        user_transfer_authority: owner,
                    },
                    self.config.amount,
                )?);
                "lending_withdraw"
            }
        };

        self.sink.phase(name, Phase::Submitting);
        let signature = self
            .submitter
            .submit_and_confirm(name, &instructions, wallet)
            .await?;

        Ok(StrategyReport::Transaction {
            action,
            target: reserve_address.to_string(),
            signature: signature.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_layouts::fixtures::{encode_price, encode_reserve, ReserveFixture};
    use crate::accounts::associated_token_address;
    use crate::instructions::DEPOSIT_RESERVE_LIQUIDITY;
    use crate::market_selector::SelectionCriterion;
    use crate::retry::RetryPolicy;
    use crate::submitter::SubmitSettings;
    use crate::testing::{MockGateway, RecordingSink};
    use crate::tx_builder::TransactionBuilder;
    use solana_sdk::message::VersionedMessage;

    fn config(action: LendingAction, program: Pubkey) -> LendingConfig {
        LendingConfig {
            name: "lend".into(),
            action,
            program,
            mint: None,
            amount: 1_000_000,
            criterion: SelectionCriterion::HighestYield,
            allowed_mints: vec![],
            require_live_oracle: true,
        }
    }

    fn strategy(
        gateway: Arc<MockGateway>,
        config: LendingConfig,
    ) -> (LendingStrategy, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let submitter = Arc::new(Submitter::new(
            gateway,
            TransactionBuilder::default(),
            SubmitSettings {
                policy: RetryPolicy::immediate(1),
                ..Default::default()
            },
        ));
        (LendingStrategy::new(config, submitter, sink.clone()), sink)
    }

    /// Two reserves: the second has higher utilization and therefore a higher supply apy.
    fn seed(gateway: &MockGateway, program: Pubkey) -> (Pubkey, Pubkey) {
        let calm = Pubkey::new_unique();
        let busy = Pubkey::new_unique();
        gateway.add_program_account(program, calm, encode_reserve(&ReserveFixture::default()));
        gateway.add_program_account(
            program,
            busy,
            encode_reserve(&ReserveFixture {
                liquidity_mint: Pubkey::new_from_array([7; 32]),
                available: 100_000_000,
                borrowed: 900_000_000,
                ..Default::default()
            }),
        );
        gateway.add_program_account(program, Pubkey::new_unique(), vec![9; RESERVE_LEN]);
        gateway.set_account(
            ReserveFixture::default().pyth_oracle,
            Pubkey::new_unique(),
            encode_price(100_000_000, -8, 1),
        );
        (calm, busy)
    }

    fn lending_instruction(tx: &solana_sdk::transaction::VersionedTransaction, program: &Pubkey) -> (Vec<Pubkey>, Vec<u8>) {
        let VersionedMessage::V0(msg) = &tx.message else {
            panic!("expected v0 message");
        };
        let ix = msg
            .instructions
            .iter()
            .find(|ix| msg.account_keys[ix.program_id_index as usize] == *program)
            .unwrap();
        let keys = ix
            .accounts
            .iter()
            .map(|i| msg.account_keys[*i as usize])
            .collect();
        (keys, ix.data.clone())
    }

    #[tokio::test]
    async fn deposits_into_highest_yield_reserve() {
        let gateway = Arc::new(MockGateway::default());
        let program = Pubkey::new_unique();
        let (_, busy) = seed(&gateway, program);
        let (strategy, sink) = strategy(gateway.clone(), config(LendingAction::Deposit, program));
        let wallet = Wallet::generate();

        let report = strategy.execute(&wallet).await.unwrap();
        match report {
            StrategyReport::Transaction { action, target, .. } => {
                assert_eq!(action, "lending_deposit");
                assert_eq!(target, busy.to_string());
            }
            other => panic!("unexpected report {other:?}"),
        }

        let sent = gateway.submitted();
        assert_eq!(sent.len(), 1);
        let (keys, data) = lending_instruction(&sent[0], &program);
        assert_eq!(keys.len(), 9);
        assert_eq!(keys[2], busy);
        assert_eq!(
            keys[0],
            associated_token_address(&wallet.pubkey(), &Pubkey::new_from_array([7; 32])).unwrap()
        );
        assert_eq!(DEPOSIT_RESERVE_LIQUIDITY.decode(&data).unwrap(), vec![1_000_000]);
        assert_eq!(
            sink.phases("lend"),
            vec![Phase::Selecting, Phase::Building, Phase::Submitting]
        );
    }

    #[tokio::test]
    async fn deepest_liquidity_picks_the_calm_reserve() {
        let gateway = Arc::new(MockGateway::default());
        let program = Pubkey::new_unique();
        let (calm, _) = seed(&gateway, program);
        let mut cfg = config(LendingAction::Deposit, program);
        cfg.criterion = SelectionCriterion::DeepestLiquidity;
        let (strategy, _) = strategy(gateway, cfg);

        let report = strategy.execute(&Wallet::generate()).await.unwrap();
        assert!(matches!(report, StrategyReport::Transaction { target, .. } if target == calm.to_string()));
    }

    #[tokio::test]
    async fn withdraw_targets_the_configured_mint() {
        let gateway = Arc::new(MockGateway::default());
        let program = Pubkey::new_unique();
        let (calm, _) = seed(&gateway, program);
        let mut cfg = config(LendingAction::Withdraw, program);
        cfg.mint = Some(ReserveFixture::default().liquidity_mint);
        let (strategy, _) = strategy(gateway.clone(), cfg);

        strategy.execute(&Wallet::generate()).await.unwrap();
        let (keys, data) = lending_instruction(&gateway.submitted()[0], &program);
        assert_eq!(keys.len(), 8);
        assert_eq!(keys[2], calm);
        assert_eq!(data[0], 2);
    }

    #[tokio::test]
    async fn no_reserves_is_data_unavailable() {
        let gateway = Arc::new(MockGateway::default());
        let (strategy, _) = strategy(gateway.clone(), config(LendingAction::Deposit, Pubkey::new_unique()));

        let err = strategy.execute(&Wallet::generate()).await.unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
        assert!(gateway.submitted().is_empty());
    }

    #[tokio::test]
    async fn halted_oracle_blocks_deposit() {
        let gateway = Arc::new(MockGateway::default());
        let program = Pubkey::new_unique();
        gateway.add_program_account(program, Pubkey::new_unique(), encode_reserve(&ReserveFixture::default()));
        gateway.set_account(
            ReserveFixture::default().pyth_oracle,
            Pubkey::new_unique(),
            encode_price(100_000_000, -8, 0),
        );
        let (strategy, _) = strategy(gateway.clone(), config(LendingAction::Deposit, program));

        let err = strategy.execute(&Wallet::generate()).await.unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
        assert!(gateway.submitted().is_empty());
    }
}
