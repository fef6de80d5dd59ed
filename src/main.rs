//! Application entry: loads config and wallet, wires gateways and strategies, runs until Ctrl-C.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use yield_farmer::config::Config;
use yield_farmer::evm::{EvmGateway, JsonRpcEvmGateway};
use yield_farmer::executor::{Executor, ExecutorConfig};
use yield_farmer::hyperliquid::HyperliquidClient;
use yield_farmer::portfolio::run_snapshots;
use yield_farmer::rpc_manager::{ChainGateway, RpcManager};
use yield_farmer::strategies::{build_strategies, Dependencies};
use yield_farmer::structured_logging::{EventSink, TracingSink};
use yield_farmer::submitter::{SubmitSettings, Submitter};
use yield_farmer::tx_builder::TransactionBuilder;
use yield_farmer::wallet::Wallet;

const DEFAULT_CONFIG_PATH: &str = "farmer.toml";

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("FARMER_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_wallet(path: &Path, create_if_missing: bool) -> anyhow::Result<Wallet> {
    if path.exists() {
        return Wallet::load(path).with_context(|| format!("loading wallet {}", path.display()));
    }
    if !create_if_missing {
        bail!("wallet {} does not exist", path.display());
    }
    let wallet = Wallet::generate();
    wallet
        .save(path)
        .with_context(|| format!("saving new wallet to {}", path.display()))?;
    warn!(wallet = %wallet.pubkey(), path = %path.display(), "generated a new wallet; fund it before strategies can act");
    Ok(wallet)
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let path = config_path();
    let cfg = Config::load(&path).with_context(|| format!("config {}", path.display()))?;
    info!(path = %path.display(), strategies = cfg.strategies.len(), "loaded config");

    let wallet = Arc::new(load_wallet(&cfg.wallet.path, cfg.wallet.create_if_missing)?);
    info!(wallet = %wallet.pubkey(), "wallet ready");

    let mut rpc = RpcManager::new(cfg.solana.rpc_endpoints.clone(), cfg.solana.commitment.to_config());
    if let Some(per_second) = cfg.solana.requests_per_second.and_then(NonZeroU32::new) {
        rpc = rpc.with_rate_limit(per_second);
    }
    let rpc = Arc::new(rpc);
    let gateway: Arc<dyn ChainGateway> = rpc.clone();

    let builder = TransactionBuilder::new(cfg.solana.transaction.clone())?;
    let submitter = Arc::new(Submitter::new(
        gateway.clone(),
        builder,
        SubmitSettings {
            commitment: cfg.solana.commitment.to_config(),
            confirm_timeout: Duration::from_secs(cfg.solana.confirm_timeout_secs),
            policy: cfg.executor.retry,
        },
    ));

    let hl = &cfg.hyperliquid;
    let hyperliquid = Arc::new(HyperliquidClient::new(
        hl.api_url.clone(),
        hl.exchange_relay_url.clone(),
        hl.relay_api_key.clone(),
        Duration::from_secs(hl.request_timeout_secs),
    )?);

    let evm: Option<Arc<dyn EvmGateway>> = match &cfg.base {
        Some(base) => Some(Arc::new(JsonRpcEvmGateway::new(
            base.rpc_url.clone(),
            base.sender,
            Duration::from_secs(30),
        )?)),
        None => None,
    };

    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);
    let deps = Dependencies {
        submitter,
        evm,
        base: cfg.base.clone(),
        klines: hyperliquid.clone(),
        venue: hyperliquid,
        sink: sink.clone(),
    };
    let strategies = build_strategies(&cfg.strategies, &deps)?;
    if strategies.is_empty() {
        warn!("no strategies configured; only portfolio snapshots will run");
    }

    let executor = Executor::new(
        wallet.clone(),
        sink.clone(),
        ExecutorConfig {
            interval: cfg.executor.interval(),
            policy: cfg.executor.retry,
        },
    );
    let mut tasks = executor.spawn(strategies);

    if cfg.executor.snapshot_interval_secs > 0 {
        tasks.spawn(run_snapshots(
            gateway,
            wallet.pubkey(),
            sink,
            Duration::from_secs(cfg.executor.snapshot_interval_secs),
        ));
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down; in-flight submissions are not rolled back");
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    for m in rpc.get_metrics().await {
        info!(
            endpoint = %m.endpoint,
            success_rate = m.success_rate(),
            avg_latency_ms = m.avg_latency_ms,
            "endpoint metrics"
        );
    }
    Ok(())
}
