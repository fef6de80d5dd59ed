//! TOML configuration, loaded once at startup. Any error here is fatal.

use std::collections::HashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::address;
use serde::{Deserialize, Deserializer};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::evm::{Address, U256};
use crate::indicators::tick_spacing;
use crate::market_selector::SelectionCriterion;
use crate::retry::RetryPolicy;
use crate::strategies::lending::LendingAction;
use crate::tx_builder::TransactionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn from_str<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn opt_from_str<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    Option::<String>::deserialize(d)?
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

fn vec_from_str<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    Vec::<String>::deserialize(d)?
        .into_iter()
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}

fn solend() -> Pubkey {
    pubkey!("So1endDq2YkqhipRh3WViPa8hdiSpxWy6z3Z6tMCpAo")
}

fn marinade() -> Pubkey {
    pubkey!("MarBmsSgKXdrN1egZf5sqe1TMai9K1rChYNDJgjq7aD")
}

fn msol_mint() -> Pubkey {
    pubkey!("mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So")
}

fn msol_leg() -> Pubkey {
    pubkey!("7GgPYjS5Dza89wV6FpZ23kUJRG5vbQ1GM25ezspYFSoE")
}

fn factory() -> Address {
    address!("33128a8fC17869897dcE68Ed026d694621f6FDfD")
}

fn position_manager() -> Address {
    address!("03a520b32C04BF3bEEf7BEb72E919cf822Ed34f1")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub executor: ExecutorSection,
    pub solana: SolanaConfig,
    #[serde(default)]
    pub base: Option<BaseConfig>,
    #[serde(default)]
    pub hyperliquid: HyperliquidConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalletConfig {
    pub path: PathBuf,
    /// Generate and save a fresh wallet when `path` does not exist.
    pub create_if_missing: bool,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wallet.json"),
            create_if_missing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSection {
    pub interval_secs: u64,
    pub retry: RetryPolicy,
    /// How often the wallet balance is reported; 0 disables snapshots.
    pub snapshot_interval_secs: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            retry: RetryPolicy::default(),
            snapshot_interval_secs: 600,
        }
    }
}

impl ExecutorSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn to_config(self) -> CommitmentConfig {
        match self {
            Commitment::Processed => CommitmentConfig::processed(),
            Commitment::Confirmed => CommitmentConfig::confirmed(),
            Commitment::Finalized => CommitmentConfig::finalized(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolanaConfig {
    pub rpc_endpoints: Vec<String>,
    #[serde(default)]
    pub commitment: Commitment,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Shared request budget across endpoints; unset means unthrottled.
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    #[serde(default)]
    pub transaction: TransactionConfig,
}

fn default_confirm_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseConfig {
    pub rpc_url: String,
    /// Endpoint-managed account used as `from` for every transaction.
    #[serde(deserialize_with = "from_str")]
    pub sender: Address,
    #[serde(default = "factory", deserialize_with = "from_str")]
    pub factory: Address,
    #[serde(default = "position_manager", deserialize_with = "from_str")]
    pub position_manager: Address,
    #[serde(default = "default_receipt_timeout")]
    pub confirm_timeout_secs: u64,
}

fn default_receipt_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperliquidConfig {
    pub api_url: String,
    pub exchange_relay_url: Option<String>,
    pub relay_api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            api_url: crate::hyperliquid::DEFAULT_API_URL.to_string(),
            exchange_relay_url: None,
            relay_api_key: None,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Lending(LendingConfig),
    Staking(StakingConfig),
    Liquidity(LiquidityConfig),
    Vault(VaultConfig),
    MovingAverage(MovingAverageConfig),
}

impl StrategyConfig {
    pub fn name(&self) -> &str {
        match self {
            StrategyConfig::Lending(c) => &c.name,
            StrategyConfig::Staking(c) => &c.name,
            StrategyConfig::Liquidity(c) => &c.name,
            StrategyConfig::Vault(c) => &c.name,
            StrategyConfig::MovingAverage(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LendingConfig {
    pub name: String,
    pub action: LendingAction,
    #[serde(default = "solend", deserialize_with = "from_str")]
    pub program: Pubkey,
    /// Liquidity mint to withdraw; for deposits, restricts selection to this mint.
    #[serde(default, deserialize_with = "opt_from_str")]
    pub mint: Option<Pubkey>,
    /// Base units of the liquidity token (deposit) or collateral token (withdraw).
    pub amount: u64,
    #[serde(default)]
    pub criterion: SelectionCriterion,
    #[serde(default, deserialize_with = "vec_from_str")]
    pub allowed_mints: Vec<Pubkey>,
    #[serde(default = "yes")]
    pub require_live_oracle: bool,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StakingConfig {
    pub name: String,
    #[serde(default = "marinade", deserialize_with = "from_str")]
    pub program: Pubkey,
    /// State account; derived from the `state` seed when unset.
    #[serde(default, deserialize_with = "opt_from_str")]
    pub state: Option<Pubkey>,
    #[serde(default = "msol_mint", deserialize_with = "from_str")]
    pub st_mint: Pubkey,
    #[serde(default = "msol_leg", deserialize_with = "from_str")]
    pub liq_pool_st_leg: Pubkey,
    pub lamports: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiquidityConfig {
    pub name: String,
    #[serde(deserialize_with = "from_str")]
    pub token_a: Address,
    #[serde(deserialize_with = "from_str")]
    pub token_b: Address,
    /// Raw token units, decimal strings.
    #[serde(deserialize_with = "from_str")]
    pub amount_a: U256,
    #[serde(deserialize_with = "from_str")]
    pub amount_b: U256,
    pub fee: u32,
    pub decimals_a: u8,
    pub decimals_b: u8,
    /// Kline symbol quoting token_a in units of token_b.
    pub price_symbol: String,
    #[serde(default = "default_interval")]
    pub price_interval: String,
    #[serde(default = "default_history_bars")]
    pub history_bars: usize,
    #[serde(default = "default_width_sigmas")]
    pub width_sigmas: f64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_history_bars() -> usize {
    100
}

fn default_width_sigmas() -> f64 {
    1.0
}

fn default_deadline_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    pub name: String,
    pub vaults: Vec<String>,
    pub amount_usd: f64,
    /// APY (percent) below which funds are withdrawn instead of deposited.
    pub stop_loss_apy: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovingAverageConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    pub short_window: usize,
    pub long_window: usize,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.interval_secs == 0 {
            return Err(invalid("executor.interval_secs must be > 0"));
        }
        if self.executor.retry.max_attempts == 0 {
            return Err(invalid("executor.retry.max_attempts must be > 0"));
        }
        if self.solana.rpc_endpoints.is_empty() {
            return Err(invalid("solana.rpc_endpoints must contain at least one endpoint"));
        }
        if self.solana.requests_per_second == Some(0) {
            return Err(invalid("solana.requests_per_second must be > 0 when set"));
        }
        self.solana
            .transaction
            .validate()
            .map_err(|e| invalid(e.to_string()))?;

        let mut names = HashSet::new();
        for strategy in &self.strategies {
            if !names.insert(strategy.name()) {
                return Err(invalid(format!("duplicate strategy name {:?}", strategy.name())));
            }
            self.validate_strategy(strategy)?;
        }
        Ok(())
    }

    fn validate_strategy(&self, strategy: &StrategyConfig) -> Result<(), ConfigError> {
        let name = strategy.name();
        if name.trim().is_empty() {
            return Err(invalid("strategy name must not be empty"));
        }
        match strategy {
            StrategyConfig::Lending(c) => {
                if c.amount == 0 {
                    return Err(invalid(format!("{name}: amount must be > 0")));
                }
                if c.action == LendingAction::Withdraw && c.mint.is_none() {
                    return Err(invalid(format!("{name}: withdraw needs a mint")));
                }
            }
            StrategyConfig::Staking(c) => {
                if c.lamports == 0 {
                    return Err(invalid(format!("{name}: lamports must be > 0")));
                }
            }
            StrategyConfig::Liquidity(c) => {
                if self.base.is_none() {
                    return Err(invalid(format!("{name}: liquidity strategies need a [base] section")));
                }
                if tick_spacing(c.fee).is_none() {
                    return Err(invalid(format!("{name}: unknown fee tier {}", c.fee)));
                }
                if c.token_a == c.token_b {
                    return Err(invalid(format!("{name}: token_a and token_b must differ")));
                }
                if c.amount_a.is_zero() && c.amount_b.is_zero() {
                    return Err(invalid(format!("{name}: at least one amount must be > 0")));
                }
                if !(c.width_sigmas.is_finite() && c.width_sigmas > 0.0) {
                    return Err(invalid(format!("{name}: width_sigmas must be positive")));
                }
                if c.history_bars < 2 {
                    return Err(invalid(format!("{name}: history_bars must be >= 2")));
                }
            }
            StrategyConfig::Vault(c) => {
                if c.vaults.is_empty() {
                    return Err(invalid(format!("{name}: vaults must not be empty")));
                }
                if !(c.amount_usd.is_finite() && c.amount_usd > 0.0) {
                    return Err(invalid(format!("{name}: amount_usd must be positive")));
                }
                if !c.stop_loss_apy.is_finite() {
                    return Err(invalid(format!("{name}: stop_loss_apy must be finite")));
                }
                if self.hyperliquid.exchange_relay_url.is_none() {
                    return Err(invalid(format!(
                        "{name}: vault strategies need hyperliquid.exchange_relay_url"
                    )));
                }
            }
            StrategyConfig::MovingAverage(c) => {
                if c.short_window == 0 || c.short_window >= c.long_window {
                    return Err(invalid(format!(
                        "{name}: need 0 < short_window < long_window"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
        [solana]
        rpc_endpoints = ["https://api.mainnet-beta.solana.com"]
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.executor.interval_secs, 300);
        assert_eq!(cfg.executor.retry.max_attempts, 3);
        assert_eq!(cfg.solana.commitment, Commitment::Confirmed);
        assert!(cfg.strategies.is_empty());
    }

    #[test]
    fn full_example_parses() {
        let raw = include_str!("../farmer.example.toml");
        let cfg = Config::from_toml(raw).unwrap();
        assert_eq!(cfg.strategies.len(), 6);
        match &cfg.strategies[0] {
            StrategyConfig::Lending(c) => {
                assert_eq!(c.program, solend());
                assert_eq!(c.action, LendingAction::Deposit);
            }
            other => panic!("unexpected {other:?}"),
        }
        let base = cfg.base.as_ref().unwrap();
        assert_eq!(base.factory, factory());
    }

    #[test]
    fn strategy_tables_fall_back_to_mainnet_programs() {
        let raw = format!(
            "{MINIMAL}\n[[strategies]]\nkind = \"staking\"\nname = \"stake\"\nlamports = 1\n\n[[strategies]]\nkind = \"lending\"\nname = \"lend\"\naction = \"deposit\"\namount = 1\n"
        );
        let cfg = Config::from_toml(&raw).unwrap();
        match &cfg.strategies[0] {
            StrategyConfig::Staking(c) => {
                assert_eq!(c.program.to_string(), "MarBmsSgKXdrN1egZf5sqe1TMai9K1rChYNDJgjq7aD");
                assert_eq!(c.st_mint.to_string(), "mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So");
                assert_eq!(c.liq_pool_st_leg.to_string(), "7GgPYjS5Dza89wV6FpZ23kUJRG5vbQ1GM25ezspYFSoE");
            }
            other => panic!("unexpected {other:?}"),
        }
        match &cfg.strategies[1] {
            StrategyConfig::Lending(c) => {
                assert_eq!(c.program.to_string(), "So1endDq2YkqhipRh3WViPa8hdiSpxWy6z3Z6tMCpAo")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_strategy_keys() {
        let raw = format!(
            "{MINIMAL}\n[[strategies]]\nkind = \"staking\"\nname = \"stake\"\nlamport = 1\nlamports = 1\n"
        );
        assert!(matches!(Config::from_toml(&raw), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_inverted_windows() {
        let raw = format!(
            "{MINIMAL}\n[[strategies]]\nkind = \"moving_average\"\nname = \"ma\"\nsymbol = \"ETH\"\nshort_window = 30\nlong_window = 10\n"
        );
        assert!(matches!(Config::from_toml(&raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let entry = "[[strategies]]\nkind = \"staking\"\nname = \"stake\"\nlamports = 5\n";
        let raw = format!("{MINIMAL}\n{entry}\n{entry}");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_withdraw_without_mint() {
        let raw = format!(
            "{MINIMAL}\n[[strategies]]\nkind = \"lending\"\nname = \"w\"\naction = \"withdraw\"\namount = 1\n"
        );
        assert!(matches!(Config::from_toml(&raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_pubkey() {
        let raw = format!(
            "{MINIMAL}\n[[strategies]]\nkind = \"staking\"\nname = \"s\"\nlamports = 5\nst_mint = \"not-a-key\"\n"
        );
        assert!(matches!(Config::from_toml(&raw), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_empty_endpoints() {
        let raw = "[solana]\nrpc_endpoints = []\n";
        assert!(matches!(Config::from_toml(raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_from_file() {
        use std::io::Write;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.solana.rpc_endpoints.len(), 1);

        let missing = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
