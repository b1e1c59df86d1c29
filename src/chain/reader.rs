//! Chain read side.
//!
//! JSON-RPC client against the vault controller endpoint. Read failures are
//! recoverable by design: the monitor treats them as "no data" and skips the
//! vault for the cycle, so every method here just propagates errors.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// On-chain state of one vault, as read this cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultState {
    pub owner: String,
    pub collateral_amount: u64,
    pub debt_amount: u64,
    pub reward_reserve: u64,
}

#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    /// Vault state, or `None` when the vault does not exist.
    async fn get_vault(&self, vault_id: &str) -> Result<Option<VaultState>>;

    /// Staking position linked to a vault for claim-and-rebalance, if any.
    async fn get_linked_position(&self, vault_id: &str) -> Result<Option<String>>;

    /// Unclaimed rewards on a staking position.
    async fn get_pending_rewards(&self, position_id: &str) -> Result<u64>;

    /// Vault ids the bot is authorized to act on.
    async fn get_authorized_vaults(&self) -> Result<Vec<String>>;

    /// vault id -> linked position id, for vaults with auto-rebalance enabled.
    async fn get_auto_rebalance_links(&self) -> Result<HashMap<String, String>>;

    /// Integer-scaled price for an asset tag (8 decimals).
    async fn get_price(&self, asset: &str) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

/// HTTP JSON-RPC implementation. Vault controller methods return JSON
/// payloads; prices come from an aggregator `eth_call` with an
/// ABI-encoded result.
pub struct HttpChainReader {
    client: reqwest::Client,
    rpc_url: String,
    price_feeds: HashMap<String, String>,
}

impl HttpChainReader {
    pub fn new(client: reqwest::Client, rpc_url: String) -> Self {
        Self {
            client,
            rpc_url,
            price_feeds: HashMap::new(),
        }
    }

    /// Registers an aggregator contract address for an asset tag.
    pub fn with_price_feed(mut self, asset: &str, address: &str) -> Self {
        self.price_feeds
            .insert(asset.to_uppercase(), address.to_string());
        self
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await
            .context("RPC request failed")?
            .json()
            .await
            .context("failed to parse RPC response")?;

        if let Some(err) = response.error {
            return Err(anyhow!("RPC error: {:?}", err));
        }

        response
            .result
            .ok_or_else(|| anyhow!("no result in RPC response"))
    }
}

#[async_trait::async_trait]
impl ChainReader for HttpChainReader {
    async fn get_vault(&self, vault_id: &str) -> Result<Option<VaultState>> {
        let result = self.rpc("vault_getState", json!([vault_id])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let state: VaultState =
            serde_json::from_value(result).context("vault state decode")?;
        Ok(Some(state))
    }

    async fn get_linked_position(&self, vault_id: &str) -> Result<Option<String>> {
        let result = self.rpc("vault_getLinkedPosition", json!([vault_id])).await?;
        Ok(result.as_str().map(|s| s.to_string()))
    }

    async fn get_pending_rewards(&self, position_id: &str) -> Result<u64> {
        let result = self
            .rpc("staking_getPendingRewards", json!([position_id]))
            .await?;
        result
            .as_u64()
            .ok_or_else(|| anyhow!("pending rewards not a u64: {result}"))
    }

    async fn get_authorized_vaults(&self) -> Result<Vec<String>> {
        let result = self.rpc("vault_getAuthorizedList", json!([])).await?;
        serde_json::from_value(result).context("authorized vault list decode")
    }

    async fn get_auto_rebalance_links(&self) -> Result<HashMap<String, String>> {
        let result = self.rpc("vault_getAutoRebalanceLinks", json!([])).await?;
        serde_json::from_value(result).context("auto-rebalance link map decode")
    }

    async fn get_price(&self, asset: &str) -> Result<u64> {
        let feed = self
            .price_feeds
            .get(&asset.to_uppercase())
            .ok_or_else(|| anyhow!("no price feed registered for {asset}"))?;

        // latestRoundData() selector: 0xfeaf968c
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": feed, "data": "0xfeaf968c" }, "latest"]),
            )
            .await?;

        let raw = result
            .as_str()
            .ok_or_else(|| anyhow!("eth_call result not a string"))?;
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .context("failed to decode hex response")?;

        // (roundId, answer, startedAt, updatedAt, answeredInRound), 5 x uint256.
        if bytes.len() < 160 {
            return Err(anyhow!("response too short: {} bytes", bytes.len()));
        }

        let answer = i128::from_be_bytes(bytes[48..64].try_into().unwrap_or([0; 16]));
        if answer < 0 {
            return Err(anyhow!("negative price answer: {answer}"));
        }
        Ok(answer as u64)
    }
}
