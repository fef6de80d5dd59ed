//! Pyth price reads over the Solana gateway.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;

use crate::account_layouts::{PriceAccount, PriceStatus};
use crate::error::ExecutionError;
use crate::rpc_manager::ChainGateway;

#[derive(Debug, Clone)]
pub struct PythOracle {
    gateway: Arc<dyn ChainGateway>,
}

impl PythOracle {
    pub fn new(gateway: Arc<dyn ChainGateway>) -> Self {
        Self { gateway }
    }

    pub async fn price_account(&self, account: &Pubkey) -> Result<PriceAccount, ExecutionError> {
        let raw = self.gateway.get_account(account).await?;
        PriceAccount::decode(&raw.data).map_err(|e| ExecutionError::MalformedAccount {
            address: account.to_string(),
            reason: e.to_string(),
        })
    }

    /// Current aggregate price, or `DataUnavailable` when the feed is not trading.
    pub async fn live_price(&self, account: &Pubkey) -> Result<f64, ExecutionError> {
        let price = self.price_account(account).await?;
        if price.status != PriceStatus::Trading {
            return Err(ExecutionError::DataUnavailable(format!(
                "oracle {account} status is {:?}",
                price.status
            )));
        }
        let value = price.price_f64();
        if !(value.is_finite() && value > 0.0) {
            return Err(ExecutionError::DataUnavailable(format!(
                "oracle {account} reports non-positive price {value}"
            )));
        }
        Ok(value)
    }
}
