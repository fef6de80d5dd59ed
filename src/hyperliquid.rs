//! Hyperliquid HTTP client: candle history and vault details from the public info API,
//! vault transfers through a signing relay.
//!
//! Transfers need an L1 action signature the agent does not produce itself; they are posted
//! to `exchange_relay_url`, which signs and forwards them to the exchange endpoint. Once a
//! transfer request may have reached the relay, a lost or failed answer is an unknown outcome
//! and is never retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ExecutionError;
use crate::sources::{KlineSource, VaultDetails, VaultVenue};
use crate::types::Kline;

pub const DEFAULT_API_URL: &str = "https://api.hyperliquid.xyz";

#[derive(Debug, Clone)]
pub struct HyperliquidClient {
    http: Client,
    api_url: String,
    relay_url: Option<String>,
    relay_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    /// Open time, ms.
    t: u64,
    /// Close price as a decimal string.
    c: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultDetailsResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    vault_address: Option<String>,
    /// Annualized return as a fraction.
    #[serde(default)]
    apr: Option<f64>,
    /// Some gateways report a ready-made percentage instead.
    #[serde(default)]
    apy: Option<f64>,
    #[serde(default)]
    tvl: Option<f64>,
    #[serde(default)]
    followers: Vec<Follower>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Follower {
    #[serde(default)]
    vault_equity: String,
}

impl VaultDetailsResponse {
    fn into_details(self, requested: &str) -> Result<VaultDetails, ExecutionError> {
        let apy = match (self.apy, self.apr) {
            (Some(apy), _) => apy,
            (None, Some(apr)) => apr * 100.0,
            (None, None) => {
                return Err(ExecutionError::DataUnavailable(format!(
                    "vault {requested}: response carries no yield"
                )))
            }
        };
        let tvl = self.tvl.unwrap_or_else(|| {
            self.followers
                .iter()
                .filter_map(|f| f.vault_equity.parse::<f64>().ok())
                .sum()
        });
        Ok(VaultDetails {
            address: self.vault_address.unwrap_or_else(|| requested.to_string()),
            name: self.name,
            apy,
            tvl,
        })
    }
}

fn interval_millis(interval: &str) -> Option<u64> {
    let (unit_start, _) = interval.char_indices().last()?;
    let (count, unit) = interval.split_at(unit_start);
    let count: u64 = count.parse().ok()?;
    let unit_ms = match unit {
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    Some(count * unit_ms)
}

fn parse_candles(candles: Vec<Candle>, limit: usize) -> Result<Vec<Kline>, ExecutionError> {
    let mut klines = candles
        .into_iter()
        .map(|c| {
            c.c.parse::<f64>()
                .map(|close| Kline {
                    close,
                    timestamp: c.t,
                })
                .map_err(|e| ExecutionError::DataUnavailable(format!("bad close {:?}: {e}", c.c)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    klines.sort_by_key(|k| k.timestamp);
    let start = klines.len().saturating_sub(limit);
    Ok(klines.split_off(start))
}

fn http_error(e: reqwest::Error) -> ExecutionError {
    ExecutionError::TransientNetwork(e.to_string())
}

/// The relay may have forwarded the transfer; only the exchange ledger can tell.
fn unconfirmed_transfer(vault: &str, is_deposit: bool, detail: impl std::fmt::Display) -> ExecutionError {
    let kind = if is_deposit { "deposit" } else { "withdrawal" };
    ExecutionError::ConfirmationTimeout {
        signature: format!("vault {kind} for {vault} ({detail})"),
    }
}

fn transfer_send_error(vault: &str, is_deposit: bool, e: reqwest::Error) -> ExecutionError {
    if e.is_connect() {
        http_error(e)
    } else {
        unconfirmed_transfer(vault, is_deposit, e)
    }
}

fn transfer_status_error(vault: &str, is_deposit: bool, status: StatusCode, body: &str) -> ExecutionError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ExecutionError::TransientNetwork(format!("HTTP {status}: {body}"))
    } else if status.is_server_error() {
        unconfirmed_transfer(vault, is_deposit, format!("HTTP {status}: {body}"))
    } else {
        ExecutionError::InstructionRejected(format!("HTTP {status}: {body}"))
    }
}

fn status_error(status: StatusCode, body: &str) -> ExecutionError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ExecutionError::TransientNetwork(format!("HTTP {status}: {body}"))
    } else {
        ExecutionError::DataUnavailable(format!("HTTP {status}: {body}"))
    }
}

impl HyperliquidClient {
    pub fn new(
        api_url: impl Into<String>,
        relay_url: Option<String>,
        relay_api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::ConfigurationInvalid(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            relay_url,
            relay_api_key,
        })
    }

    async fn info<T: serde::de::DeserializeOwned>(
        &self,
        body: serde_json::Value,
    ) -> Result<T, ExecutionError> {
        let resp = self
            .http
            .post(format!("{}/info", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ExecutionError::DataUnavailable(format!("info response: {e}")))
    }

    async fn transfer(&self, vault: &str, usd: f64, is_deposit: bool) -> Result<String, ExecutionError> {
        let relay = self.relay_url.as_deref().ok_or_else(|| {
            ExecutionError::ConfigurationInvalid("hyperliquid.exchange_relay_url is not set".into())
        })?;
        if !(usd.is_finite() && usd > 0.0) {
            return Err(ExecutionError::ConfigurationInvalid(format!(
                "vault transfer amount {usd} must be positive"
            )));
        }

        // The exchange takes USD amounts as integer micros.
        let payload = json!({
            "type": "vaultTransfer",
            "vaultAddress": vault,
            "isDeposit": is_deposit,
            "usd": (usd * 1e6).round() as u64,
        });

        let mut req = self.http.post(relay).json(&payload);
        if let Some(k) = &self.relay_api_key {
            req = req.header("X-API-KEY", k);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transfer_send_error(vault, is_deposit, e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| unconfirmed_transfer(vault, is_deposit, e))?;
        if !status.is_success() {
            return Err(transfer_status_error(vault, is_deposit, status, &text));
        }

        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        if value.get("status").and_then(|s| s.as_str()) == Some("err") {
            let reason = value
                .get("response")
                .map(|r| r.to_string())
                .unwrap_or_else(|| text.clone());
            return Err(ExecutionError::InstructionRejected(reason));
        }
        debug!(vault = %vault, is_deposit, "vault transfer accepted by relay");
        Ok(value
            .get("response")
            .map(|r| r.to_string())
            .unwrap_or(text))
    }
}

#[async_trait]
impl KlineSource for HyperliquidClient {
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, ExecutionError> {
        let step = interval_millis(interval).ok_or_else(|| {
            ExecutionError::ConfigurationInvalid(format!("unsupported candle interval {interval}"))
        })?;
        let end = Utc::now().timestamp_millis().max(0) as u64;
        // One extra bar so the current, still-open candle does not shorten the window.
        let start = end.saturating_sub(step * (limit as u64 + 1));

        let candles: Vec<Candle> = self
            .info(json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": symbol,
                    "interval": interval,
                    "startTime": start,
                    "endTime": end,
                }
            }))
            .await?;
        parse_candles(candles, limit)
    }
}

#[async_trait]
impl VaultVenue for HyperliquidClient {
    async fn vault_details(&self, vault: &str) -> Result<VaultDetails, ExecutionError> {
        let resp: Option<VaultDetailsResponse> = self
            .info(json!({ "type": "vaultDetails", "vaultAddress": vault }))
            .await?;
        resp.ok_or_else(|| ExecutionError::DataUnavailable(format!("vault {vault} not found")))?
            .into_details(vault)
    }

    async fn deposit(&self, vault: &str, usd: f64) -> Result<String, ExecutionError> {
        self.transfer(vault, usd, true).await
    }

    async fn withdraw(&self, vault: &str, usd: f64) -> Result<String, ExecutionError> {
        self.transfer(vault, usd, false).await
    }
}
