//! Chain write side.
//!
//! Exactly two corrective operations exist: claim staking rewards and fold
//! them into vault collateral, or fold the vault's existing reward reserve
//! into collateral. The paper writer simulates both for dry-run operation.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TxOutcome {
    pub tx_ref: String,
    pub amount_moved: u64,
}

#[async_trait::async_trait]
pub trait ChainWriter: Send + Sync {
    /// Claims pending rewards from the linked position and rebalances them
    /// into the vault's collateral.
    async fn submit_claim_and_rebalance(
        &self,
        position_id: &str,
        vault_id: &str,
    ) -> Result<TxOutcome>;

    /// Moves the vault's reward reserve into collateral.
    async fn submit_rebalance_from_reserve(&self, vault_id: &str) -> Result<TxOutcome>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

/// Live JSON-RPC submitter. Signing happens inside the vault controller
/// endpoint; this client only names the operation and its arguments.
pub struct HttpChainWriter {
    client: reqwest::Client,
    rpc_url: String,
}

impl HttpChainWriter {
    pub fn new(client: reqwest::Client, rpc_url: String) -> Self {
        Self { client, rpc_url }
    }

    async fn submit(&self, method: &str, params: serde_json::Value) -> Result<TxOutcome> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .timeout(Duration::from_secs(30))
            .json(&payload)
            .send()
            .await
            .context("RPC submit failed")?
            .json()
            .await
            .context("failed to parse RPC response")?;

        if let Some(err) = response.error {
            return Err(anyhow!("RPC error: {:?}", err));
        }

        let result = response
            .result
            .ok_or_else(|| anyhow!("no result in RPC response"))?;
        serde_json::from_value(result).context("tx outcome decode")
    }
}

#[async_trait::async_trait]
impl ChainWriter for HttpChainWriter {
    async fn submit_claim_and_rebalance(
        &self,
        position_id: &str,
        vault_id: &str,
    ) -> Result<TxOutcome> {
        let op_id = Uuid::new_v4().to_string();
        info!(vault_id, position_id, op_id, "submitting claim-and-rebalance");
        self.submit(
            "vault_submitClaimAndRebalance",
            json!([position_id, vault_id, op_id]),
        )
        .await
    }

    async fn submit_rebalance_from_reserve(&self, vault_id: &str) -> Result<TxOutcome> {
        let op_id = Uuid::new_v4().to_string();
        info!(vault_id, op_id, "submitting rebalance-from-reserve");
        self.submit("vault_submitRebalanceFromReserve", json!([vault_id, op_id]))
            .await
    }
}

/// Dry-run writer: logs what would be submitted and fabricates an ack.
/// Used when VAULTGUARD_DRY_RUN=1.
#[derive(Debug, Default)]
pub struct PaperChainWriter;

#[async_trait::async_trait]
impl ChainWriter for PaperChainWriter {
    async fn submit_claim_and_rebalance(
        &self,
        position_id: &str,
        vault_id: &str,
    ) -> Result<TxOutcome> {
        warn!(
            vault_id,
            position_id, "DRY RUN: would submit claim-and-rebalance"
        );
        Ok(TxOutcome {
            tx_ref: format!("dry_run_{}", Uuid::new_v4()),
            amount_moved: 0,
        })
    }

    async fn submit_rebalance_from_reserve(&self, vault_id: &str) -> Result<TxOutcome> {
        warn!(vault_id, "DRY RUN: would submit rebalance-from-reserve");
        Ok(TxOutcome {
            tx_ref: format!("dry_run_{}", Uuid::new_v4()),
            amount_moved: 0,
        })
    }
}
