//! Base (EVM) gateway over plain JSON-RPC, and the Uniswap v3 calldata the liquidity
//! strategy needs.
//!
//! Notes:
//! - Transactions go out through `eth_sendTransaction`; the endpoint signs with its managed
//!   account (`sender`), so no EVM key material lives in this process.
//! - Receipts are polled; a missing receipt at the deadline is an unknown outcome.
//! - A send whose answer is lost is never retried unless the request provably did not reach
//!   the node and the sender's pending nonce did not move.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::hex;
pub use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::rpc_manager::{Confirmation, GatewayError};

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub mod abi {
    use alloy_sol_types::sol;

    sol! {
        function approve(address spender, uint256 amount) external returns (bool);

        function allowance(address owner, address spender) external view returns (uint256 remaining);

        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);

        function decimals() external view returns (uint8);

        struct MintParams {
            address token0;
            address token1;
            uint24 fee;
            int24 tickLower;
            int24 tickUpper;
            uint256 amount0Desired;
            uint256 amount1Desired;
            uint256 amount0Min;
            uint256 amount1Min;
            address recipient;
            uint256 deadline;
        }

        function mint(MintParams params) external payable returns (uint256 tokenId, uint128 liquidity, uint256 amount0, uint256 amount1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmTx {
    pub to: Address,
    pub data: Vec<u8>,
    pub value: U256,
}

impl EvmTx {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
        }
    }
}

#[async_trait]
pub trait EvmGateway: Send + Sync + std::fmt::Debug {
    /// Account transactions are sent from.
    fn sender(&self) -> Address;

    /// Read-only call against the latest block; returns the raw return data.
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, GatewayError>;

    /// Transaction count of `sender` including pending transactions.
    async fn pending_nonce(&self) -> Result<u64, GatewayError>;

    /// Returns the transaction hash as 0x-prefixed hex.
    async fn send(&self, tx: EvmTx) -> Result<String, GatewayError>;

    async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<Confirmation, GatewayError>;
}

/// Send and wait for the receipt, mapping the outcome onto the execution taxonomy.
pub async fn send_and_confirm(
    gateway: &dyn EvmGateway,
    tx: EvmTx,
    wait: Duration,
) -> Result<String, ExecutionError> {
    let to = tx.to;
    let nonce = gateway.pending_nonce().await?;
    let hash = match gateway.send(tx).await {
        Ok(hash) => hash,
        Err(e @ (GatewayError::Transport(_) | GatewayError::OutcomeUnknown(_))) => {
            return Err(lost_send(gateway, to, nonce, e).await);
        }
        Err(e) => return Err(e.into()),
    };
    debug!(to = %to, tx_hash = %hash, nonce, "evm transaction sent");

    match gateway.wait_for_receipt(&hash, wait).await {
        Ok(Confirmation::Landed { slot }) => {
            info!(tx_hash = %hash, block = slot, "evm transaction confirmed");
            Ok(hash)
        }
        Ok(Confirmation::Reverted(reason)) => Err(ExecutionError::InstructionRejected(format!(
            "{hash} reverted: {reason}"
        ))),
        Ok(Confirmation::Expired) | Ok(Confirmation::TimedOut) | Err(_) => {
            Err(ExecutionError::ConfirmationTimeout { signature: hash })
        }
    }
}

/// Classify a send that produced no transaction hash. Only a request that never reached the
/// node, with the sender's pending nonce unchanged since, may be sent again.
async fn lost_send(gateway: &dyn EvmGateway, to: Address, nonce: u64, err: GatewayError) -> ExecutionError {
    let moved = matches!(gateway.pending_nonce().await, Ok(now) if now > nonce);
    match err {
        GatewayError::Transport(msg) if !moved => ExecutionError::TransientNetwork(msg),
        err => {
            warn!(to = %to, nonce, error = %err, nonce_moved = moved, "evm send outcome unknown");
            ExecutionError::ConfirmationTimeout {
                signature: format!("unacknowledged transaction to {to} at sender nonce {nonce}"),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    status: Option<String>,
    block_number: Option<String>,
}

impl Receipt {
    fn confirmation(&self) -> Confirmation {
        match self.status.as_deref() {
            Some("0x0") => Confirmation::Reverted("status 0x0".into()),
            _ => Confirmation::Landed {
                slot: self
                    .block_number
                    .as_deref()
                    .and_then(|b| u64::from_str_radix(b.trim_start_matches("0x"), 16).ok())
                    .unwrap_or_default(),
            },
        }
    }
}

/// Limit-exceeded, per EIP-1474.
const LIMIT_EXCEEDED: i64 = -32005;

fn envelope_result(envelope: RpcEnvelope) -> Result<Value, GatewayError> {
    if let Some(err) = envelope.error {
        return Err(if err.code == LIMIT_EXCEEDED {
            GatewayError::RateLimited(err.message)
        } else {
            GatewayError::Rejected(format!("{} (code {})", err.message, err.code))
        });
    }
    Ok(envelope.result.unwrap_or(Value::Null))
}

fn parse_quantity(value: &Value) -> Result<u64, GatewayError> {
    value
        .as_str()
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| GatewayError::Decode(format!("expected hex quantity, got {value}")))
}

fn decode_hex(value: &Value) -> Result<Vec<u8>, GatewayError> {
    let s = value
        .as_str()
        .ok_or_else(|| GatewayError::Decode(format!("expected hex string, got {value}")))?;
    hex::decode(s).map_err(|e| GatewayError::Decode(e.to_string()))
}

#[derive(Debug)]
pub struct JsonRpcEvmGateway {
    http: Client,
    url: String,
    sender: Address,
    next_id: AtomicU64,
}

impl JsonRpcEvmGateway {
    pub fn new(url: impl Into<String>, sender: Address, request_timeout: Duration) -> Result<Self, ExecutionError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ExecutionError::ConfigurationInvalid(format!("http client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            sender,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        self.exchange(method, params, false).await
    }

    /// One JSON-RPC round trip. With `effectful` set, any failure after the request may have
    /// reached the node is `OutcomeUnknown` rather than a retryable transport error.
    async fn exchange(&self, method: &str, params: Value, effectful: bool) -> Result<Value, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let lost = |detail: String| {
            if effectful {
                GatewayError::OutcomeUnknown(format!("{method}: {detail}"))
            } else {
                GatewayError::Transport(format!("{method}: {detail}"))
            }
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    GatewayError::Transport(format!("{method}: {e}"))
                } else {
                    lost(e.to_string())
                }
            })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited(format!("{method}: HTTP 429")));
        }
        if !status.is_success() {
            return Err(lost(format!("HTTP {status}")));
        }
        let envelope: RpcEnvelope = resp.json().await.map_err(|e| {
            if effectful {
                lost(e.to_string())
            } else {
                GatewayError::Decode(format!("{method}: {e}"))
            }
        })?;
        envelope_result(envelope)
    }
}

#[async_trait]
impl EvmGateway for JsonRpcEvmGateway {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        let params = json!([
            { "from": self.sender.to_string(), "to": to.to_string(), "data": hex::encode_prefixed(&data) },
            "latest"
        ]);
        let result = self.request("eth_call", params).await?;
        decode_hex(&result)
    }

    async fn pending_nonce(&self) -> Result<u64, GatewayError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([self.sender.to_string(), "pending"]),
            )
            .await?;
        parse_quantity(&result)
    }

    async fn send(&self, tx: EvmTx) -> Result<String, GatewayError> {
        let params = json!([{
            "from": self.sender.to_string(),
            "to": tx.to.to_string(),
            "data": hex::encode_prefixed(&tx.data),
            "value": format!("0x{:x}", tx.value),
        }]);
        let result = self.exchange("eth_sendTransaction", params, true).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Decode(format!("expected tx hash, got {result}")))
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: &str,
        wait: Duration,
    ) -> Result<Confirmation, GatewayError> {
        let polling = async {
            loop {
                match self
                    .request("eth_getTransactionReceipt", json!([tx_hash]))
                    .await
                {
                    Ok(Value::Null) => {}
                    Ok(value) => {
                        return serde_json::from_value::<Receipt>(value)
                            .map(|receipt| receipt.confirmation())
                            .map_err(|e| GatewayError::Decode(e.to_string()));
                    }
                    Err(e) => debug!(tx_hash = %tx_hash, error = %e, "receipt poll failed"),
                }
                sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        match timeout(wait, polling).await {
            Ok(result) => result,
            Err(_) => Ok(Confirmation::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolCall;

    #[test]
    fn approve_calldata_layout() {
        let spender = Address::repeat_byte(0x11);
        let data = abi::approveCall {
            spender,
            amount: U256::from(1_000u64),
        }
        .abi_encode();
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 32 * 2);
        assert_eq!(&data[16..36], spender.as_slice());
    }

    #[test]
    fn get_pool_selector_and_return() {
        let data = abi::getPoolCall {
            tokenA: Address::repeat_byte(1),
            tokenB: Address::repeat_byte(2),
            fee: 3_000,
        }
        .abi_encode();
        assert_eq!(&data[..4], &[0x16, 0x98, 0xee, 0x82]);

        let mut ret = vec![0u8; 32];
        ret[12..].copy_from_slice(Address::repeat_byte(0x42).as_slice());
        let decoded = abi::getPoolCall::abi_decode_returns(&ret, true).unwrap();
        assert_eq!(decoded.pool, Address::repeat_byte(0x42));
    }

    #[test]
    fn receipts_map_to_confirmations() {
        let ok: Receipt =
            serde_json::from_value(json!({"status": "0x1", "blockNumber": "0x10"})).unwrap();
        assert_eq!(ok.confirmation(), Confirmation::Landed { slot: 16 });
        let reverted: Receipt =
            serde_json::from_value(json!({"status": "0x0", "blockNumber": "0x10"})).unwrap();
        assert!(matches!(reverted.confirmation(), Confirmation::Reverted(_)));
    }

    #[test]
    fn rpc_errors_are_classified() {
        let limited = RpcEnvelope {
            result: None,
            error: Some(RpcErrorObject {
                code: LIMIT_EXCEEDED,
                message: "slow down".into(),
            }),
        };
        assert!(matches!(envelope_result(limited), Err(GatewayError::RateLimited(_))));

        let reverted = RpcEnvelope {
            result: None,
            error: Some(RpcErrorObject {
                code: 3,
                message: "execution reverted".into(),
            }),
        };
        assert!(matches!(envelope_result(reverted), Err(GatewayError::Rejected(_))));
    }

    #[tokio::test]
    async fn send_and_confirm_returns_hash() {
        let gateway = crate::testing::MockEvm::new(vec![]);
        let hash = send_and_confirm(
            &gateway,
            EvmTx::call(Address::ZERO, vec![1, 2, 3]),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(hash.starts_with("0x"));
        assert_eq!(gateway.sent().len(), 1);
    }

    async fn send_once(gateway: &crate::testing::MockEvm) -> Result<String, ExecutionError> {
        send_and_confirm(
            gateway,
            EvmTx::call(Address::repeat_byte(0x99), vec![1]),
            Duration::from_secs(1),
        )
        .await
    }

    #[tokio::test]
    async fn accepted_send_without_answer_needs_reconciliation() {
        use crate::testing::{MockEvm, SendFault};

        let gateway = MockEvm::new(vec![]);
        gateway.fail_sends_to(Address::repeat_byte(0x99), SendFault::LostAfterAccept);
        let err = send_once(&gateway).await.unwrap_err();
        assert_eq!(err.kind(), "confirmation_timeout");
        assert!(err.needs_reconciliation());
        assert_eq!(gateway.sent().len(), 1);

        let gateway = MockEvm::new(vec![]);
        gateway.fail_sends_to(Address::repeat_byte(0x99), SendFault::NoAnswer);
        let err = send_once(&gateway).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.needs_reconciliation());
    }

    #[tokio::test]
    async fn unreachable_node_is_retryable() {
        use crate::testing::{MockEvm, SendFault};

        let gateway = MockEvm::new(vec![]);
        gateway.fail_sends_to(Address::repeat_byte(0x99), SendFault::Unreachable);
        let err = send_once(&gateway).await.unwrap_err();
        assert_eq!(err.kind(), "transient_network");
        assert!(gateway.sent().is_empty());
    }

    fn gateway_at(addr: std::net::SocketAddr) -> JsonRpcEvmGateway {
        JsonRpcEvmGateway::new(format!("http://{addr}"), Address::ZERO, Duration::from_millis(300)).unwrap()
    }

    #[tokio::test]
    async fn silent_node_leaves_sends_unknown_and_reads_transient() {
        // Connections complete in the backlog; nothing ever answers.
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let gateway = gateway_at(silent.local_addr().unwrap());

        let err = gateway.send(EvmTx::call(Address::ZERO, vec![])).await.unwrap_err();
        assert!(matches!(err, GatewayError::OutcomeUnknown(_)), "{err:?}");

        let err = gateway.call(Address::ZERO, vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_plain_transport() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let gateway = gateway_at(addr);

        let err = gateway.send(EvmTx::call(Address::ZERO, vec![])).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)), "{err:?}");
    }

    #[test]
    fn quantities_parse_from_hex() {
        assert_eq!(parse_quantity(&json!("0x1a")).unwrap(), 26);
        assert!(parse_quantity(&json!(26)).is_err());
    }
}
