pub mod account_layouts;
pub mod accounts;
pub mod config;
pub mod error;
pub mod evm;
pub mod executor;
pub mod hyperliquid;
pub mod indicators;
pub mod instructions;
pub mod market_selector;
pub mod oracle;
pub mod portfolio;
pub mod retry;
pub mod rpc_manager;
pub mod sources;
pub mod strategies;
pub mod structured_logging;
pub mod submitter;
pub mod tx_builder;
pub mod types;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;
