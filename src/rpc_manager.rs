use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcSendTransactionConfig},
    rpc_filter::RpcFilterType,
    rpc_request::RpcError,
};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinSet, time::timeout};
use tracing::{debug, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(8);
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Node answered "preflight failed" or "signature verification failed".
const PREFLIGHT_FAILURE_CODES: [i64; 2] = [-32002, -32003];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("decode: {0}")]
    Decode(String),
    /// The request reached the node but no answer came back; its effect is unknown.
    #[error("no answer to {0}")]
    OutcomeUnknown(String),
}

impl GatewayError {
    /// Whether another endpoint might answer differently.
    fn should_fail_over(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::RateLimited(_))
    }
}

impl From<ClientError> for GatewayError {
    fn from(e: ClientError) -> Self {
        match e.kind() {
            ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. })
                if PREFLIGHT_FAILURE_CODES.contains(code) =>
            {
                GatewayError::Rejected(message.clone())
            }
            ClientErrorKind::TransactionError(te) => GatewayError::Rejected(te.to_string()),
            ClientErrorKind::Reqwest(re) if re.status().map(|s| s.as_u16()) == Some(429) => {
                GatewayError::RateLimited(re.to_string())
            }
            ClientErrorKind::SerdeJson(se) => GatewayError::Decode(se.to_string()),
            _ => GatewayError::Transport(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentBlockhash {
    pub hash: Hash,
    /// Last block height at which a transaction using `hash` can still land.
    pub last_valid_block_height: u64,
}

/// Final state of a submitted signature as far as this process could observe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Landed { slot: u64 },
    /// Executed and failed on chain.
    Reverted(String),
    /// Blockhash passed its last valid height without the signature landing.
    Expired,
    /// Gave up waiting; the transaction may still land.
    TimedOut,
}

/// Everything the strategies need from a Solana cluster. Allows injecting mocks in tests.
#[async_trait]
pub trait ChainGateway: Send + Sync + std::fmt::Debug {
    async fn latest_blockhash(&self) -> Result<RecentBlockhash, GatewayError>;

    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, GatewayError>;

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        last_valid_block_height: u64,
        timeout: Duration,
    ) -> Result<Confirmation, GatewayError>;

    /// `GatewayError::NotFound` when the account does not exist.
    async fn get_account(&self, address: &Pubkey) -> Result<Account, GatewayError>;

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        data_size: Option<u64>,
    ) -> Result<Vec<(Pubkey, Account)>, GatewayError>;

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, GatewayError>;
}

/// What one status poll saw for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ObservedStatus {
    pub slot: u64,
    pub err: Option<String>,
    pub reached_commitment: bool,
}

/// Decide a confirmation from one poll, or `None` to keep polling.
pub(crate) fn classify(
    observed: Option<&ObservedStatus>,
    block_height: u64,
    last_valid_block_height: u64,
) -> Option<Confirmation> {
    if let Some(status) = observed {
        if let Some(err) = &status.err {
            return Some(Confirmation::Reverted(err.clone()));
        }
        if status.reached_commitment {
            return Some(Confirmation::Landed { slot: status.slot });
        }
        // Seen at a lower commitment: it can no longer expire.
        return None;
    }
    if block_height > last_valid_block_height {
        return Some(Confirmation::Expired);
    }
    None
}

/// Per-endpoint success counts and smoothed latency, logged at shutdown.
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_ms: f64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
}

impl EndpointMetrics {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            last_success: None,
            last_failure: None,
        }
    }

    fn record_success(&mut self, latency: Duration) {
        self.success_count += 1;
        self.last_success = Some(Instant::now());

        let latency_ms = latency.as_millis() as f64;
        if self.avg_latency_ms == 0.0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms = 0.9 * self.avg_latency_ms + 0.1 * latency_ms;
        }
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

type Metrics = Arc<Mutex<HashMap<String, EndpointMetrics>>>;

/// Solana gateway over one or more HTTP RPC endpoints.
///
/// Reads rotate across endpoints and fail over on transport errors; submissions are
/// replicated to every endpoint and the first acceptance wins.
pub struct RpcManager {
    pub endpoints: Vec<String>,
    commitment: CommitmentConfig,
    rotation: AtomicUsize,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    client_cache: Arc<Mutex<HashMap<String, Arc<RpcClient>>>>,
    metrics: Metrics,
}

impl std::fmt::Debug for RpcManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcManager")
            .field("endpoints", &self.endpoints)
            .field("commitment", &self.commitment.commitment)
            .field("rate_limited", &self.limiter.is_some())
            .field("cached_clients", &"<cached>")
            .field("metrics", &"<metrics>")
            .finish()
    }
}

impl RpcManager {
    pub fn new(endpoints: Vec<String>, commitment: CommitmentConfig) -> Self {
        let metrics = endpoints
            .iter()
            .map(|endpoint| (endpoint.clone(), EndpointMetrics::new(endpoint.clone())))
            .collect();

        Self {
            endpoints,
            commitment,
            rotation: AtomicUsize::new(0),
            limiter: None,
            client_cache: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Throttle every request across all endpoints to `per_second`.
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(per_second))));
        self
    }

    async fn get_client(&self, endpoint: &str) -> Arc<RpcClient> {
        let mut cache = self.client_cache.lock().await;

        if let Some(client) = cache.get(endpoint) {
            Arc::clone(client)
        } else {
            let client = Arc::new(RpcClient::new_with_commitment(
                endpoint.to_string(),
                self.commitment,
            ));
            cache.insert(endpoint.to_string(), Arc::clone(&client));
            client
        }
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn record_metrics(&self, endpoint: &str, success: bool, latency: Option<Duration>) {
        Self::record_into(&self.metrics, endpoint, success, latency).await;
    }

    async fn record_into(metrics: &Metrics, endpoint: &str, success: bool, latency: Option<Duration>) {
        let mut metrics = metrics.lock().await;
        if let Some(endpoint_metrics) = metrics.get_mut(endpoint) {
            if success {
                endpoint_metrics.record_success(latency.unwrap_or_default());
            } else {
                endpoint_metrics.record_failure();
            }
        }
    }

    pub async fn get_metrics(&self) -> Vec<EndpointMetrics> {
        let metrics = self.metrics.lock().await;
        metrics.values().cloned().collect()
    }

    /// Endpoints in the order the next read should try them.
    fn read_order(&self) -> Vec<String> {
        let n = self.endpoints.len();
        let start = self.rotation.fetch_add(1, Ordering::Relaxed) % n.max(1);
        (0..n)
            .map(|i| self.endpoints[(start + i) % n].clone())
            .collect()
    }

    /// Run one read against each endpoint in turn until one answers with something other
    /// than a transport-level failure.
    async fn read<T, F, Fut>(&self, what: &str, op: F) -> Result<T, GatewayError>
    where
        F: Fn(Arc<RpcClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        T: Send,
    {
        if self.endpoints.is_empty() {
            return Err(GatewayError::Transport("no RPC endpoints configured".into()));
        }

        let mut last_err = None;
        for endpoint in self.read_order() {
            self.throttle().await;
            let client = self.get_client(&endpoint).await;
            let start = Instant::now();
            match op(client).await {
                Ok(value) => {
                    self.record_metrics(&endpoint, true, Some(start.elapsed())).await;
                    return Ok(value);
                }
                Err(e) if e.should_fail_over() => {
                    self.record_metrics(&endpoint, false, None).await;
                    debug!(endpoint = %endpoint, error = %e, "RpcManager: {} failed, trying next endpoint", what);
                    last_err = Some(e);
                }
                Err(e) => {
                    // The node answered; a different node would say the same.
                    self.record_metrics(&endpoint, true, Some(start.elapsed())).await;
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GatewayError::Transport(format!("{what}: all endpoints failed"))))
    }

    async fn send_single_tx(
        client: Arc<RpcClient>,
        endpoint: String,
        tx: VersionedTransaction,
        preflight: CommitmentConfig,
        metrics: Metrics,
    ) -> Result<Signature, GatewayError> {
        let send_cfg = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(preflight.commitment),
            // Rebroadcast is ours to decide.
            max_retries: Some(0),
            ..Default::default()
        };

        debug!("RpcManager: sending tx to endpoint: {}", endpoint);

        let start = Instant::now();
        match timeout(SEND_TIMEOUT, client.send_transaction_with_config(&tx, send_cfg)).await {
            Ok(Ok(sig)) => {
                let latency = start.elapsed();
                info!(endpoint = %endpoint, signature = %sig, ?latency, "RpcManager: transaction accepted");
                Self::record_into(&metrics, &endpoint, true, Some(latency)).await;
                Ok(sig)
            }
            Ok(Err(e)) => {
                let err = GatewayError::from(e);
                warn!(endpoint = %endpoint, error = %err, "RpcManager: endpoint send failed");
                Self::record_into(&metrics, &endpoint, !err.should_fail_over(), None).await;
                Err(err)
            }
            Err(_elapsed) => {
                warn!("RpcManager: endpoint timed out on {} after {:?}", endpoint, SEND_TIMEOUT);
                Self::record_into(&metrics, &endpoint, false, None).await;
                Err(GatewayError::Transport(format!("send timeout after {:?}", SEND_TIMEOUT)))
            }
        }
    }

    /// First successful send wins. When every endpoint fails, a rejection is reported in
    /// preference to transport noise, since it says something about the transaction itself.
    async fn wait_for_first_success(
        mut set: JoinSet<Result<Signature, GatewayError>>,
    ) -> Result<Signature, GatewayError> {
        let mut errors = Vec::new();
        while let Some(join_res) = set.join_next().await {
            match join_res {
                Ok(Ok(sig)) => {
                    set.abort_all();
                    return Ok(sig);
                }
                Ok(Err(e)) => {
                    debug!("RpcManager: task returned error: {}", e);
                    errors.push(e);
                }
                Err(join_err) => {
                    warn!("RpcManager: task join error: {}", join_err);
                    errors.push(GatewayError::Transport(join_err.to_string()));
                }
            }
        }

        Err(Self::most_informative(errors))
    }

    fn most_informative(errors: Vec<GatewayError>) -> GatewayError {
        let rank = |e: &GatewayError| match e {
            GatewayError::Rejected(_) => 0,
            GatewayError::RateLimited(_) => 1,
            _ => 2,
        };
        errors
            .into_iter()
            .min_by_key(rank)
            .unwrap_or_else(|| GatewayError::Transport("all send attempts failed".into()))
    }

    async fn poll_once(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        last_valid_block_height: u64,
    ) -> Result<Option<Confirmation>, GatewayError> {
        let sig = *signature;
        let observed = self
            .read("get_signature_statuses", move |client| async move {
                let statuses = client.get_signature_statuses(&[sig]).await?;
                Ok(statuses.value.into_iter().next().flatten().map(|status| ObservedStatus {
                    slot: status.slot,
                    err: status.err.as_ref().map(|e| e.to_string()),
                    reached_commitment: status.satisfies_commitment(commitment),
                }))
            })
            .await?;

        let block_height = if observed.is_some() {
            0
        } else {
            self.read("get_block_height", |client| async move {
                Ok(client.get_block_height().await?)
            })
            .await?
        };

        Ok(classify(observed.as_ref(), block_height, last_valid_block_height))
    }
}

#[async_trait]
impl ChainGateway for RpcManager {
    async fn latest_blockhash(&self) -> Result<RecentBlockhash, GatewayError> {
        let commitment = self.commitment;
        self.read("get_latest_blockhash", move |client| async move {
            let (hash, last_valid_block_height) = client
                .get_latest_blockhash_with_commitment(commitment)
                .await?;
            Ok(RecentBlockhash {
                hash,
                last_valid_block_height,
            })
        })
        .await
    }

    async fn submit(&self, tx: &VersionedTransaction) -> Result<Signature, GatewayError> {
        if self.endpoints.is_empty() {
            return Err(GatewayError::Transport("no RPC endpoints configured".into()));
        }

        info!("RpcManager: replicating tx to {} endpoint(s)", self.endpoints.len());

        let mut set: JoinSet<Result<Signature, GatewayError>> = JoinSet::new();
        for endpoint in &self.endpoints {
            self.throttle().await;
            let endpoint = endpoint.clone();
            let tx = tx.clone();
            let client = self.get_client(&endpoint).await;
            let metrics = Arc::clone(&self.metrics);
            let preflight = self.commitment;

            set.spawn(async move {
                Self::send_single_tx(client, endpoint, tx, preflight, metrics).await
            });
        }

        Self::wait_for_first_success(set).await
    }

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        last_valid_block_height: u64,
        wait: Duration,
    ) -> Result<Confirmation, GatewayError> {
        let polling = async {
            loop {
                match self.poll_once(signature, commitment, last_valid_block_height).await {
                    Ok(Some(outcome)) => return outcome,
                    Ok(None) => {}
                    Err(e) => {
                        debug!(signature = %signature, error = %e, "RpcManager: status poll failed");
                    }
                }
                tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
            }
        };

        match timeout(wait, polling).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(Confirmation::TimedOut),
        }
    }

    async fn get_account(&self, address: &Pubkey) -> Result<Account, GatewayError> {
        let address = *address;
        let commitment = self.commitment;
        self.read("get_account", move |client| async move {
            client
                .get_account_with_commitment(&address, commitment)
                .await?
                .value
                .ok_or_else(|| GatewayError::NotFound(format!("account {address}")))
        })
        .await
    }

    async fn get_program_accounts(
        &self,
        program: &Pubkey,
        data_size: Option<u64>,
    ) -> Result<Vec<(Pubkey, Account)>, GatewayError> {
        let program = *program;
        let commitment = self.commitment;
        self.read("get_program_accounts", move |client| async move {
            let config = RpcProgramAccountsConfig {
                filters: data_size.map(|size| vec![RpcFilterType::DataSize(size)]),
                account_config: RpcAccountInfoConfig {
                    encoding: Some(UiAccountEncoding::Base64),
                    commitment: Some(commitment),
                    ..Default::default()
                },
                ..Default::default()
            };
            Ok(client
                .get_program_accounts_with_config(&program, config)
                .await?)
        })
        .await
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, GatewayError> {
        let address = *address;
        let commitment = self.commitment;
        self.read("get_balance", move |client| async move {
            Ok(client
                .get_balance_with_commitment(&address, commitment)
                .await?
                .value)
        })
        .await
    }
}
