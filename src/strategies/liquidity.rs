//! Concentrated-liquidity position on a Uniswap v3 deployment (Base).
//!
//! Flow per cycle: resolve the pool through the factory, size a tick range from recent price
//! history, top up any token allowance the position manager lacks, mint.

use std::sync::Arc;
use std::time::Duration;

use alloy_sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::LiquidityConfig;
use crate::error::ExecutionError;
use crate::evm::{abi, send_and_confirm, Address, EvmGateway, EvmTx, U256};
use crate::indicators::{full_range, stddev, tick_range, tick_spacing, PoolTokens};
use crate::sources::KlineSource;
use crate::structured_logging::EventSink;
use crate::types::{Phase, StrategyReport};
use crate::wallet::Wallet;

use super::Strategy;

/// The configured pair in pool order (token0 < token1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OrderedPair {
    token0: Address,
    token1: Address,
    amount0: U256,
    amount1: U256,
    tokens: PoolTokens,
}

impl OrderedPair {
    fn from_config(c: &LiquidityConfig) -> Self {
        if c.token_a < c.token_b {
            Self {
                token0: c.token_a,
                token1: c.token_b,
                amount0: c.amount_a,
                amount1: c.amount_b,
                tokens: PoolTokens {
                    decimals0: c.decimals_a,
                    decimals1: c.decimals_b,
                    price_is_token0_in_token1: true,
                },
            }
        } else {
            Self {
                token0: c.token_b,
                token1: c.token_a,
                amount0: c.amount_b,
                amount1: c.amount_a,
                tokens: PoolTokens {
                    decimals0: c.decimals_b,
                    decimals1: c.decimals_a,
                    price_is_token0_in_token1: false,
                },
            }
        }
    }
}

#[derive(Debug)]
pub struct LiquidityStrategy {
    config: LiquidityConfig,
    position_manager: Address,
    factory: Address,
    receipt_timeout: Duration,
    evm: Arc<dyn EvmGateway>,
    klines: Arc<dyn KlineSource>,
    sink: Arc<dyn EventSink>,
}

impl LiquidityStrategy {
    pub fn new(
        config: LiquidityConfig,
        position_manager: Address,
        factory: Address,
        receipt_timeout: Duration,
        evm: Arc<dyn EvmGateway>,
        klines: Arc<dyn KlineSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            position_manager,
            factory,
            receipt_timeout,
            evm,
            klines,
            sink,
        }
    }

    async fn pool(&self, pair: &OrderedPair) -> Result<Address, ExecutionError> {
        let data = abi::getPoolCall {
            tokenA: pair.token0,
            tokenB: pair.token1,
            fee: self.config.fee,
        }
        .abi_encode();
        let ret = self.evm.call(self.factory, data).await?;
        let pool = abi::getPoolCall::abi_decode_returns(&ret, true)
            .map_err(|e| ExecutionError::DataUnavailable(format!("getPool returned garbage: {e}")))?
            .pool;
        if pool == Address::ZERO {
            return Err(ExecutionError::DataUnavailable(format!(
                "no pool for {}/{} at fee {}",
                pair.token0, pair.token1, self.config.fee
            )));
        }
        Ok(pool)
    }

    /// Tick range around the last close, or the full range when history is unusable.
    async fn ticks(&self, tokens: PoolTokens, spacing: i32) -> (i32, i32) {
        let c = &self.config;
        let bars = match self
            .klines
            .klines(&c.price_symbol, &c.price_interval, c.history_bars)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(strategy = %c.name, error = %e, "price history unavailable, using full range");
                return full_range(spacing);
            }
        };
        let closes: Vec<f64> = bars.iter().map(|k| k.close).collect();
        match (closes.last(), stddev(&closes, closes.len())) {
            (Some(&last), Some(sigma)) if closes.len() >= 2 => {
                tick_range(last, sigma, c.width_sigmas, spacing, tokens)
            }
            _ => {
                warn!(strategy = %c.name, bars = closes.len(), "not enough price history, using full range");
                full_range(spacing)
            }
        }
    }

    /// `approve` calldata for each token whose allowance to the position manager does not cover
    /// the amount being minted.
    async fn approvals(&self, pair: &OrderedPair) -> Result<Vec<(Address, Vec<u8>)>, ExecutionError> {
        let owner = self.evm.sender();
        let mut approvals = Vec::with_capacity(2);
        for (token, amount) in [(pair.token0, pair.amount0), (pair.token1, pair.amount1)] {
            if amount.is_zero() {
                continue;
            }
            let query = abi::allowanceCall {
                owner,
                spender: self.position_manager,
            }
            .abi_encode();
            let ret = self.evm.call(token, query).await?;
            let remaining = abi::allowanceCall::abi_decode_returns(&ret, true)
                .map_err(|e| {
                    ExecutionError::DataUnavailable(format!("allowance on {token} returned garbage: {e}"))
                })?
                .remaining;
            if remaining >= amount {
                debug!(strategy = %self.config.name, token = %token, %remaining, "allowance covers position");
                continue;
            }
            let data = abi::approveCall {
                spender: self.position_manager,
                amount,
            }
            .abi_encode();
            approvals.push((token, data));
        }
        Ok(approvals)
    }

    async fn send(&self, to: Address, data: Vec<u8>) -> Result<String, ExecutionError> {
        send_and_confirm(self.evm.as_ref(), EvmTx::call(to, data), self.receipt_timeout).await
    }
}

#[async_trait]
impl Strategy for LiquidityStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, _wallet: &Wallet) -> Result<StrategyReport, ExecutionError> {
        let name = self.config.name.as_str();
        let spacing = tick_spacing(self.config.fee).ok_or_else(|| {
            ExecutionError::ConfigurationInvalid(format!("unknown fee tier {}", self.config.fee))
        })?;
        let pair = OrderedPair::from_config(&self.config);

        self.sink.phase(name, Phase::Selecting);
        let pool = self.pool(&pair).await?;
        let (tick_lower, tick_upper) = self.ticks(pair.tokens, spacing).await;
        self.sink.progress(
            name,
            &format!("pool {pool}: ticks [{tick_lower}, {tick_upper}] spacing {spacing}"),
        );

        self.sink.phase(name, Phase::Building);
        let approvals = self.approvals(&pair).await?;

        let deadline = Utc::now().timestamp().max(0) as u64 + self.config.deadline_secs;
        let mint = abi::mintCall {
            params: abi::MintParams {
                token0: pair.token0,
                token1: pair.token1,
                fee: self.config.fee,
                tickLower: tick_lower,
                tickUpper: tick_upper,
                amount0Desired: pair.amount0,
                amount1Desired: pair.amount1,
                amount0Min: U256::ZERO,
                amount1Min: U256::ZERO,
                recipient: self.evm.sender(),
                deadline: U256::from(deadline),
            },
        }
        .abi_encode();

        self.sink.phase(name, Phase::Submitting);
        let mut tx_hashes = Vec::with_capacity(3);
        for (token, data) in approvals {
            tx_hashes.push(self.send(token, data).await?);
        }
        tx_hashes.push(self.send(self.position_manager, mint).await?);

        Ok(StrategyReport::EvmTransactions {
            action: "mint_position",
            target: pool.to_string(),
            tx_hashes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Executor, ExecutorConfig};
    use crate::retry::RetryPolicy;
    use crate::rpc_manager::Confirmation;
    use crate::testing::{MockEvm, RecordingSink, SendFault, StaticKlines};
    use crate::types::ExecutionOutcome;

    fn config() -> LiquidityConfig {
        LiquidityConfig {
            name: "lp".into(),
            // token_a sorts after token_b, so the pair is reordered.
            token_a: Address::repeat_byte(0x42),
            token_b: Address::repeat_byte(0x08),
            amount_a: U256::from(1_000_000_000_000_000u64),
            amount_b: U256::from(2_000_000u64),
            fee: 3_000,
            decimals_a: 18,
            decimals_b: 6,
            price_symbol: "ETH".into(),
            price_interval: "1h".into(),
            history_bars: 100,
            width_sigmas: 1.0,
            deadline_secs: 900,
        }
    }

    fn pool_return(pool: Address) -> Vec<u8> {
        let mut ret = vec![0u8; 32];
        ret[12..].copy_from_slice(pool.as_slice());
        ret
    }

    fn strategy(evm: Arc<MockEvm>, klines: StaticKlines) -> LiquidityStrategy {
        LiquidityStrategy::new(
            config(),
            position_manager(),
            Address::repeat_byte(0x77),
            Duration::from_secs(1),
            evm,
            Arc::new(klines),
            Arc::new(RecordingSink::default()),
        )
    }

    fn position_manager() -> Address {
        Address::repeat_byte(0x99)
    }

    async fn run_with_retries(strategy: &LiquidityStrategy) -> ExecutionOutcome {
        let executor = Executor::new(
            Arc::new(Wallet::generate()),
            Arc::new(RecordingSink::default()),
            ExecutorConfig {
                interval: Duration::from_secs(3_600),
                policy: RetryPolicy::immediate(3),
            },
        );
        executor.run_cycle(strategy).await
    }

    fn minted(evm: &MockEvm) -> abi::MintParams {
        let sent = evm.sent();
        let mint = sent.last().unwrap();
        assert_eq!(mint.to, position_manager());
        abi::mintCall::abi_decode(&mint.data, true).unwrap().params
    }

    #[tokio::test]
    async fn approves_then_mints_in_pool_order() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::repeat_byte(0x55))));
        let closes = (0..100).map(|i| 2_000.0 + (i % 5) as f64 * 10.0).collect();
        let report = strategy(evm.clone(), StaticKlines::new(closes))
            .execute(&Wallet::generate())
            .await
            .unwrap();

        let sent = evm.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].to, Address::repeat_byte(0x08));
        assert_eq!(sent[1].to, Address::repeat_byte(0x42));
        assert!(matches!(report, StrategyReport::EvmTransactions { ref tx_hashes, .. } if tx_hashes.len() == 3));

        let params = minted(&evm);
        assert_eq!(params.token0, Address::repeat_byte(0x08));
        assert_eq!(params.amount0Desired, U256::from(2_000_000u64));
        assert_eq!(params.recipient, Address::repeat_byte(0xaa));
        assert!(params.tickLower < params.tickUpper);
        assert_eq!(params.tickLower % 60, 0);
        assert_ne!((params.tickLower, params.tickUpper), full_range(60));
    }

    #[tokio::test]
    async fn missing_history_uses_full_range() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::repeat_byte(0x55))));
        strategy(evm.clone(), StaticKlines::failing())
            .execute(&Wallet::generate())
            .await
            .unwrap();
        let params = minted(&evm);
        assert_eq!((params.tickLower, params.tickUpper), full_range(60));
    }

    #[tokio::test]
    async fn unknown_pool_sends_nothing() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::ZERO)));
        let err = strategy(evm.clone(), StaticKlines::new(vec![1.0; 10]))
            .execute(&Wallet::generate())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "data_unavailable");
        assert!(evm.sent().is_empty());
    }

    #[tokio::test]
    async fn reverted_mint_is_retried_without_new_approvals() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::repeat_byte(0x55))));
        evm.push_receipt(Confirmation::Landed { slot: 1 });
        evm.push_receipt(Confirmation::Landed { slot: 1 });
        evm.push_receipt(Confirmation::Reverted("STF".into()));
        let strategy = strategy(evm.clone(), StaticKlines::failing());

        let outcome = run_with_retries(&strategy).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(evm.approvals(), 2);
        assert_eq!(evm.sent_to(position_manager()), 2);
    }

    #[tokio::test]
    async fn mint_accepted_without_answer_is_sent_once() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::repeat_byte(0x55))));
        evm.fail_sends_to(position_manager(), SendFault::LostAfterAccept);
        let strategy = strategy(evm.clone(), StaticKlines::failing());

        let outcome = run_with_retries(&strategy).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.needs_reconciliation);
        assert_eq!(evm.sent_to(position_manager()), 1);
    }

    #[tokio::test]
    async fn unreachable_node_retries_only_the_mint() {
        let evm = Arc::new(MockEvm::new(pool_return(Address::repeat_byte(0x55))));
        evm.fail_sends_to(position_manager(), SendFault::Unreachable);
        let strategy = strategy(evm.clone(), StaticKlines::failing());

        let outcome = run_with_retries(&strategy).await;

        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.needs_reconciliation);
        assert_eq!(evm.approvals(), 2);
        assert_eq!(evm.sent_to(position_manager()), 0);
    }
}
