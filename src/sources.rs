//! Off-chain data and venue seams used by the strategies.

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::types::Kline;

/// Historical price bars, oldest first.
#[async_trait]
pub trait KlineSource: Send + Sync + std::fmt::Debug {
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, ExecutionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VaultDetails {
    pub address: String,
    pub name: String,
    /// Annual yield in percent.
    pub apy: f64,
    /// Total value locked in USD.
    pub tvl: f64,
}

/// A venue holding yield vaults that accept USD-denominated transfers.
#[async_trait]
pub trait VaultVenue: Send + Sync + std::fmt::Debug {
    async fn vault_details(&self, vault: &str) -> Result<VaultDetails, ExecutionError>;

    /// Returns a venue-specific reference for the transfer.
    async fn deposit(&self, vault: &str, usd: f64) -> Result<String, ExecutionError>;

    async fn withdraw(&self, vault: &str, usd: f64) -> Result<String, ExecutionError>;
}
