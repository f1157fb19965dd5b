//! Ethereum JSON-RPC execution backend.
//!
//! Talks to a node that manages its own accounts (a local development node
//! or a signing proxy): transactions go out through `eth_sendTransaction`,
//! and durability is established by polling `eth_getTransactionReceipt`
//! and, when more than one confirmation is required, `eth_blockNumber`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::abi;
use crate::backend_traits::{Address, BackendResult, Bundle, Deployer, ExecutionBackend, Receipt};
use crate::error::BackendError;

/// JSON-RPC error code used by nodes for rate limiting.
const LIMIT_EXCEEDED: i64 = -32005;

/// JSON-RPC backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Node endpoint
    pub url: String,
    /// Sender account; first of `eth_accounts` when unset
    pub from: Option<String>,
    /// Blocks (including the inclusion block) required before an action
    /// counts as durable
    pub confirmations: u64,
    /// Delay between receipt / block-number polls
    pub poll_interval: Duration,
    /// Give up waiting for a receipt after this long
    pub receipt_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            url: "http://127.0.0.1:8545".to_string(),
            from: None,
            confirmations: 1,
            poll_interval: Duration::from_millis(500),
            receipt_timeout: Duration::from_secs(120),
        }
    }
}

impl RpcConfig {
    pub fn new(url: &str) -> Self {
        RpcConfig {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_from(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    contract_address: Option<String>,
}

/// Execution backend speaking Ethereum JSON-RPC over HTTP.
pub struct JsonRpcBackend {
    config: RpcConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcBackend {
    pub fn new(config: RpcConfig) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("linkdeploy/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    async fn call(&self, method: &str, params: Value) -> BackendResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(rpc.method = method, rpc.id = id, "json-rpc request");

        let response = self.http.post(&self.config.url).json(&body).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(BackendError::Unavailable(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(BackendError::Rejected(format!("{method}: HTTP {status}")));
        }

        let envelope: RpcEnvelope = response.json().await?;
        if let Some(err) = envelope.error {
            let detail = format!("{method}: {} (code {})", err.message, err.code);
            return Err(if err.code == LIMIT_EXCEEDED {
                BackendError::Unavailable(detail)
            } else {
                BackendError::Rejected(detail)
            });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn sender(&self) -> BackendResult<String> {
        if let Some(from) = &self.config.from {
            return Ok(from.clone());
        }
        let accounts = self.call("eth_accounts", json!([])).await?;
        accounts
            .as_array()
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::Rejected("node exposes no accounts".to_string()))
    }

    async fn send_transaction(&self, tx: Value) -> BackendResult<String> {
        let hash = self.call("eth_sendTransaction", json!([tx])).await?;
        hash.as_str()
            .map(str::to_string)
            .ok_or_else(|| BackendError::Unavailable(format!("unexpected tx hash: {hash}")))
    }

    async fn block_number(&self) -> BackendResult<u64> {
        let raw = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    /// Poll until the transaction is included, succeeded, and has the
    /// configured confirmation depth.
    async fn wait_until_durable(&self, tx_hash: &str) -> BackendResult<RpcReceipt> {
        let deadline = Instant::now() + self.config.receipt_timeout;

        let receipt = loop {
            let raw = self
                .call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !raw.is_null() {
                let receipt: RpcReceipt = serde_json::from_value(raw).map_err(|e| {
                    BackendError::Unavailable(format!("malformed receipt for {tx_hash}: {e}"))
                })?;
                break receipt;
            }
            if Instant::now() >= deadline {
                return Err(BackendError::Unavailable(format!(
                    "no receipt for {tx_hash} after {:?}",
                    self.config.receipt_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        if receipt.status.as_deref() == Some("0x0") {
            return Err(BackendError::Rejected(format!("transaction {tx_hash} reverted")));
        }

        if self.config.confirmations > 1 {
            let included = receipt
                .block_number
                .as_deref()
                .map(|b| parse_quantity(&Value::String(b.to_string())))
                .transpose()?
                .ok_or_else(|| {
                    BackendError::Unavailable(format!("receipt for {tx_hash} has no block"))
                })?;
            let target = included + self.config.confirmations - 1;
            loop {
                let head = self.block_number().await?;
                if head >= target {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(tx = %tx_hash, head, target, "confirmation wait timed out");
                    return Err(BackendError::Unavailable(format!(
                        "{tx_hash} reached block {head}, needed {target}"
                    )));
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Ok(receipt)
    }
}

#[async_trait]
impl ExecutionBackend for JsonRpcBackend {
    async fn deployer(&self) -> BackendResult<Deployer> {
        Ok(Deployer(self.sender().await?))
    }

    async fn deploy(&self, bundle: &Bundle, args: &[Address]) -> BackendResult<Address> {
        let from = self.sender().await?;
        let data = abi::deploy_data(bundle, args)?;
        let tx_hash = self
            .send_transaction(json!({
                "from": from,
                "data": format!("0x{}", hex::encode(data)),
            }))
            .await?;

        let receipt = self
            .wait_until_durable(&tx_hash)
            .await
            .map_err(|err| unconfirmed(&tx_hash, err))?;
        let address = receipt.contract_address.ok_or_else(|| {
            BackendError::Rejected(format!("deploy {tx_hash} produced no contract address"))
        })?;
        info!(tx = %tx_hash, address = %address, "deployment confirmed");
        Ok(Address::new(address))
    }

    async fn mutate(
        &self,
        target: &Address,
        method: &str,
        args: &[Address],
    ) -> BackendResult<Receipt> {
        let from = self.sender().await?;
        let data = abi::call_data(method, args)?;
        let tx_hash = self
            .send_transaction(json!({
                "from": from,
                "to": target.as_str(),
                "data": format!("0x{}", hex::encode(data)),
            }))
            .await?;

        let receipt = self
            .wait_until_durable(&tx_hash)
            .await
            .map_err(|err| unconfirmed(&tx_hash, err))?;
        let block_number = receipt
            .block_number
            .as_deref()
            .map(|b| parse_quantity(&Value::String(b.to_string())))
            .transpose()
            .map_err(|err| unconfirmed(&tx_hash, err))?;
        info!(tx = %tx_hash, target = %target, method, "mutation confirmed");
        Ok(Receipt {
            transaction_hash: receipt.transaction_hash,
            block_number,
        })
    }
}

/// Once a transaction hash exists, a transient failure no longer means
/// "nothing happened".
fn unconfirmed(tx_hash: &str, err: BackendError) -> BackendError {
    match err {
        BackendError::Unavailable(reason) => BackendError::Unconfirmed {
            tx_hash: tx_hash.to_string(),
            reason,
        },
        other => other,
    }
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
fn parse_quantity(raw: &Value) -> BackendResult<u64> {
    let s = raw
        .as_str()
        .ok_or_else(|| BackendError::Unavailable(format!("expected hex quantity, got {raw}")))?;
    let body = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(body, 16)
        .map_err(|e| BackendError::Unavailable(format!("bad hex quantity {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity(&json!("0x1b4")).unwrap(), 436);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn transient_failures_after_submission_become_unconfirmed() {
        let err = unconfirmed("0x11", BackendError::Unavailable("no receipt".into()));
        assert_eq!(err.unconfirmed_tx(), Some("0x11"));
        let reverted = unconfirmed("0x11", BackendError::Rejected("reverted".into()));
        assert_eq!(reverted, BackendError::Rejected("reverted".into()));
    }

    #[test]
    fn default_config_targets_local_node() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.url, "http://127.0.0.1:8545");
        assert_eq!(cfg.confirmations, 1);
        assert!(cfg.from.is_none());
    }
}
