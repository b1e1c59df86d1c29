//! Action dispatcher.
//!
//! Takes the analyzer's recommendations and dispatches at most one on-chain
//! write per vault, gated by the cooldown and the executor rate limit. Tool
//! selection is delegated to the reasoning backend in forced-tool mode, with
//! the same three-way priority policy evaluated locally when the backend is
//! absent or unusable.

use crate::chain::ChainWriter;
use crate::llm::{ReasoningBackend, ToolInvocation, ToolSpec};
use crate::models::{AnalysisResult, ExecutionResult, VaultHealthMetrics};
use crate::throttle::{CooldownGate, RateLimiter};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const TOOL_CLAIM_AND_REBALANCE: &str = "claim_and_rebalance";
const TOOL_REBALANCE_FROM_RESERVE: &str = "rebalance_from_reserve";
const TOOL_SKIP: &str = "skip";

pub struct ActionDispatcher {
    cooldown: Arc<CooldownGate>,
    rate_limiter: Arc<RateLimiter>,
    writer: Arc<dyn ChainWriter>,
    llm: Option<Arc<dyn ReasoningBackend>>,
}

/// The operation the dispatcher settled on for a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    ClaimAndRebalance { position_id: String },
    RebalanceFromReserve,
    Skip { reason: String },
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TOOL_CLAIM_AND_REBALANCE,
            description: "Claim pending staking rewards from the linked position and rebalance \
                          them into the vault's collateral.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "position_id": { "type": "string" },
                    "vault_id": { "type": "string" }
                },
                "required": ["position_id", "vault_id"]
            }),
        },
        ToolSpec {
            name: TOOL_REBALANCE_FROM_RESERVE,
            description: "Move the vault's reward reserve into collateral.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "vault_id": { "type": "string" }
                },
                "required": ["vault_id"]
            }),
        },
        ToolSpec {
            name: TOOL_SKIP,
            description: "Take no action this cycle.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" }
                },
                "required": ["reason"]
            }),
        },
    ]
}

impl ActionDispatcher {
    pub fn new(
        cooldown: Arc<CooldownGate>,
        rate_limiter: Arc<RateLimiter>,
        writer: Arc<dyn ChainWriter>,
        llm: Option<Arc<dyn ReasoningBackend>>,
    ) -> Self {
        Self {
            cooldown,
            rate_limiter,
            writer,
            llm,
        }
    }

    /// Dispatches a batch, severest action first. Input order (the
    /// analyzer's LTV order) is irrelevant here.
    pub async fn execute_all(
        &self,
        analyses: &[AnalysisResult],
        metrics_by_id: &HashMap<String, VaultHealthMetrics>,
        links: &HashMap<String, String>,
    ) -> Vec<ExecutionResult> {
        let mut actionable: Vec<&AnalysisResult> = analyses
            .iter()
            .filter(|a| a.should_act && a.action != crate::models::RecommendedAction::None)
            .collect();
        actionable.sort_by(|a, b| b.action.severity().cmp(&a.action.severity()));

        let mut results = Vec::with_capacity(actionable.len());
        for analysis in actionable {
            let Some(metrics) = metrics_by_id.get(&analysis.vault_id) else {
                warn!(vault_id = %analysis.vault_id, "no metrics for analyzed vault, skipping");
                continue;
            };
            let linked = links.get(&analysis.vault_id).map(|s| s.as_str());
            results.push(self.execute(analysis, metrics, linked).await);
        }
        results
    }

    pub async fn execute(
        &self,
        analysis: &AnalysisResult,
        metrics: &VaultHealthMetrics,
        linked_position: Option<&str>,
    ) -> ExecutionResult {
        // Cooldown first: a blocked vault must not consume a rate-limit slot.
        if !self.cooldown.can_act(&analysis.vault_id) {
            let remaining = self
                .cooldown
                .remaining(&analysis.vault_id)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            info!(
                vault_id = %analysis.vault_id,
                remaining_secs = remaining,
                "vault on cooldown"
            );
            return ExecutionResult::failure(
                &analysis.vault_id,
                "cooldown",
                format!("on cooldown, {remaining}s remaining"),
            );
        }

        self.rate_limiter.admit("executor").await;

        let op = match &self.llm {
            Some(llm) => {
                match self
                    .choose_via_backend(llm.as_ref(), analysis, metrics, linked_position)
                    .await
                {
                    Ok(Some(op)) => op,
                    Ok(None) => {
                        return ExecutionResult::failure(
                            &analysis.vault_id,
                            "no_action",
                            "backend returned no tool selection",
                        );
                    }
                    Err(e) => {
                        warn!(
                            vault_id = %analysis.vault_id,
                            error = %e,
                            "executor backend failed, using fallback policy"
                        );
                        fallback_operation(metrics, linked_position)
                    }
                }
            }
            None => fallback_operation(metrics, linked_position),
        };

        self.dispatch(analysis, op).await
    }

    async fn choose_via_backend(
        &self,
        llm: &dyn ReasoningBackend,
        analysis: &AnalysisResult,
        metrics: &VaultHealthMetrics,
        linked_position: Option<&str>,
    ) -> anyhow::Result<Option<Operation>> {
        let system = "You are executing a corrective action for a DeFi vault. You must call \
                      exactly one tool. Decision policy, in priority order: if pending rewards \
                      are present, call claim_and_rebalance; otherwise if the reward reserve is \
                      non-zero, call rebalance_from_reserve; otherwise call skip with a reason.";

        let user = format!(
            "Vault {id}\n\
             Recommended action: {action} ({reasoning})\n\
             Pending rewards: {pending}\n\
             Reward reserve: {reserve}\n\
             Linked staking position: {linked}\n\
             Estimated rewards needed: {needed}",
            id = analysis.vault_id,
            action = analysis.action.as_str(),
            reasoning = analysis.reasoning,
            pending = metrics.pending_rewards,
            reserve = metrics.reward_reserve,
            linked = linked_position.unwrap_or("(none)"),
            needed = analysis.estimated_rewards_needed,
        );

        let Some(call) = llm
            .complete_forced_tool(system, &user, &tool_specs())
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(parse_tool_call(&call, linked_position)?))
    }

    async fn dispatch(&self, analysis: &AnalysisResult, op: Operation) -> ExecutionResult {
        match op {
            Operation::Skip { reason } => {
                info!(vault_id = %analysis.vault_id, reason, "skipping vault");
                // A skip is not a write and never starts a cooldown.
                ExecutionResult {
                    vault_id: analysis.vault_id.clone(),
                    success: true,
                    action: "skip".to_string(),
                    tx_ref: None,
                    amount_moved: 0,
                    error: None,
                    executed_at: Utc::now(),
                }
            }
            Operation::ClaimAndRebalance { position_id } => {
                match self
                    .writer
                    .submit_claim_and_rebalance(&position_id, &analysis.vault_id)
                    .await
                {
                    Ok(tx) => {
                        self.cooldown.record_action(&analysis.vault_id);
                        info!(
                            vault_id = %analysis.vault_id,
                            tx_ref = %tx.tx_ref,
                            amount_moved = tx.amount_moved,
                            "claim-and-rebalance submitted"
                        );
                        ExecutionResult {
                            vault_id: analysis.vault_id.clone(),
                            success: true,
                            action: TOOL_CLAIM_AND_REBALANCE.to_string(),
                            tx_ref: Some(tx.tx_ref),
                            amount_moved: tx.amount_moved,
                            error: None,
                            executed_at: Utc::now(),
                        }
                    }
                    Err(e) => ExecutionResult::failure(
                        &analysis.vault_id,
                        TOOL_CLAIM_AND_REBALANCE,
                        e.to_string(),
                    ),
                }
            }
            Operation::RebalanceFromReserve => {
                match self
                    .writer
                    .submit_rebalance_from_reserve(&analysis.vault_id)
                    .await
                {
                    Ok(tx) => {
                        self.cooldown.record_action(&analysis.vault_id);
                        info!(
                            vault_id = %analysis.vault_id,
                            tx_ref = %tx.tx_ref,
                            amount_moved = tx.amount_moved,
                            "rebalance-from-reserve submitted"
                        );
                        ExecutionResult {
                            vault_id: analysis.vault_id.clone(),
                            success: true,
                            action: TOOL_REBALANCE_FROM_RESERVE.to_string(),
                            tx_ref: Some(tx.tx_ref),
                            amount_moved: tx.amount_moved,
                            error: None,
                            executed_at: Utc::now(),
                        }
                    }
                    Err(e) => ExecutionResult::failure(
                        &analysis.vault_id,
                        TOOL_REBALANCE_FROM_RESERVE,
                        e.to_string(),
                    ),
                }
            }
        }
    }
}

/// Maps the backend's tool call onto an operation. The linked position
/// known from the chain wins over whatever the model echoed back.
fn parse_tool_call(
    call: &ToolInvocation,
    linked_position: Option<&str>,
) -> anyhow::Result<Operation> {
    match call.name.as_str() {
        TOOL_CLAIM_AND_REBALANCE => {
            let position_id = linked_position
                .map(|s| s.to_string())
                .or_else(|| {
                    call.arguments
                        .get("position_id")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                })
                .ok_or_else(|| {
                    anyhow::anyhow!("claim_and_rebalance chosen but no linked position")
                })?;
            Ok(Operation::ClaimAndRebalance { position_id })
        }
        TOOL_REBALANCE_FROM_RESERVE => Ok(Operation::RebalanceFromReserve),
        TOOL_SKIP => {
            let reason = call
                .arguments
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("(no reason given)")
                .to_string();
            Ok(Operation::Skip { reason })
        }
        other => Err(anyhow::anyhow!("backend chose unknown tool: {other}")),
    }
}

/// Deterministic three-way policy, same priority order the backend is
/// instructed with.
fn fallback_operation(metrics: &VaultHealthMetrics, linked_position: Option<&str>) -> Operation {
    if metrics.pending_rewards > 0 {
        if let Some(position_id) = linked_position {
            return Operation::ClaimAndRebalance {
                position_id: position_id.to_string(),
            };
        }
    }
    if metrics.reward_reserve > 0 {
        return Operation::RebalanceFromReserve;
    }
    Operation::Skip {
        reason: "no pending rewards and empty reserve".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TxOutcome;
    use crate::models::{HealthTier, RecommendedAction};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        claims: Mutex<Vec<(String, String)>>,
        reserves: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ChainWriter for RecordingWriter {
        async fn submit_claim_and_rebalance(
            &self,
            position_id: &str,
            vault_id: &str,
        ) -> anyhow::Result<TxOutcome> {
            if self.fail {
                anyhow::bail!("rpc down");
            }
            self.claims
                .lock()
                .push((position_id.to_string(), vault_id.to_string()));
            Ok(TxOutcome {
                tx_ref: "0xabc".to_string(),
                amount_moved: 42,
            })
        }

        async fn submit_rebalance_from_reserve(
            &self,
            vault_id: &str,
        ) -> anyhow::Result<TxOutcome> {
            if self.fail {
                anyhow::bail!("rpc down");
            }
            self.reserves.lock().push(vault_id.to_string());
            Ok(TxOutcome {
                tx_ref: "0xdef".to_string(),
                amount_moved: 7,
            })
        }
    }

    fn metrics(vault_id: &str, pending: u64, reserve: u64) -> VaultHealthMetrics {
        VaultHealthMetrics {
            vault_id: vault_id.to_string(),
            owner: "owner-1".to_string(),
            collateral_value: 10_000,
            debt_value: 7_000,
            ltv_bps: 7_000,
            tier: HealthTier::Critical,
            reward_reserve: reserve,
            pending_rewards: pending,
            recommended: RecommendedAction::UrgentRebalance,
        }
    }

    fn analysis(vault_id: &str, action: RecommendedAction) -> AnalysisResult {
        AnalysisResult {
            vault_id: vault_id.to_string(),
            should_act: true,
            action,
            reasoning: "test".to_string(),
            confidence: 0.9,
            estimated_rewards_needed: 1_000,
            available_rewards: 500,
        }
    }

    fn dispatcher(writer: Arc<RecordingWriter>, cooldown_secs: u64) -> ActionDispatcher {
        ActionDispatcher::new(
            Arc::new(CooldownGate::new(cooldown_secs)),
            Arc::new(RateLimiter::new(100)),
            writer,
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn pending_rewards_with_link_claims() {
        let writer = Arc::new(RecordingWriter::default());
        let d = dispatcher(writer.clone(), 300);

        let r = d
            .execute(
                &analysis("v1", RecommendedAction::Rebalance),
                &metrics("v1", 100, 50),
                Some("pos-9"),
            )
            .await;
        assert!(r.success);
        assert_eq!(r.action, "claim_and_rebalance");
        assert_eq!(r.tx_ref.as_deref(), Some("0xabc"));
        assert_eq!(
            writer.claims.lock().as_slice(),
            &[("pos-9".to_string(), "v1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_without_link_uses_reserve() {
        let writer = Arc::new(RecordingWriter::default());
        let d = dispatcher(writer.clone(), 300);

        let r = d
            .execute(
                &analysis("v1", RecommendedAction::Rebalance),
                &metrics("v1", 100, 50),
                None,
            )
            .await;
        assert!(r.success);
        assert_eq!(r.action, "rebalance_from_reserve");
        assert!(writer.claims.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_funds_skips_and_starts_no_cooldown() {
        let writer = Arc::new(RecordingWriter::default());
        let cooldown = Arc::new(CooldownGate::new(300));
        let d = ActionDispatcher::new(
            cooldown.clone(),
            Arc::new(RateLimiter::new(100)),
            writer.clone(),
            None,
        );

        let r = d
            .execute(
                &analysis("v1", RecommendedAction::ClaimRewards),
                &metrics("v1", 0, 0),
                None,
            )
            .await;
        assert!(r.success);
        assert_eq!(r.action, "skip");
        assert!(cooldown.can_act("v1"));
        assert!(writer.claims.lock().is_empty());
        assert!(writer.reserves.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_blocks_without_consuming_rate_slot() {
        let writer = Arc::new(RecordingWriter::default());
        let limiter = Arc::new(RateLimiter::new(100));
        let cooldown = Arc::new(CooldownGate::new(300));
        let d = ActionDispatcher::new(cooldown.clone(), limiter.clone(), writer.clone(), None);

        let a = analysis("v1", RecommendedAction::Rebalance);
        let m = metrics("v1", 100, 0);

        let first = d.execute(&a, &m, Some("pos-1")).await;
        assert!(first.success);

        let second = d.execute(&a, &m, Some("pos-1")).await;
        assert!(!second.success);
        assert_eq!(second.action, "cooldown");
        assert!(second.error.unwrap().contains("remaining"));
        // One write, one rate-limit admission total.
        assert_eq!(writer.claims.lock().len(), 1);
        assert_eq!(limiter.in_flight("executor").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_reports_error_and_keeps_cooldown_open() {
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let cooldown = Arc::new(CooldownGate::new(300));
        let d = ActionDispatcher::new(
            cooldown.clone(),
            Arc::new(RateLimiter::new(100)),
            writer,
            None,
        );

        let r = d
            .execute(
                &analysis("v1", RecommendedAction::Rebalance),
                &metrics("v1", 0, 50),
                None,
            )
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("rpc down"));
        // Failed writes retry naturally next cycle.
        assert!(cooldown.can_act("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_dispatch_orders_by_severity() {
        let writer = Arc::new(RecordingWriter::default());
        let d = dispatcher(writer.clone(), 0);

        let analyses = vec![
            analysis("low", RecommendedAction::ClaimRewards),
            analysis("high", RecommendedAction::UrgentRebalance),
            analysis("mid", RecommendedAction::Rebalance),
        ];
        let mut metrics_by_id = HashMap::new();
        for id in ["low", "high", "mid"] {
            metrics_by_id.insert(id.to_string(), metrics(id, 0, 10));
        }
        let links = HashMap::new();

        let results = d.execute_all(&analyses, &metrics_by_id, &links).await;
        let order: Vec<&str> = results.iter().map(|r| r.vault_id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_eq!(
            writer.reserves.lock().as_slice(),
            &["high".to_string(), "mid".to_string(), "low".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_act_false_is_never_dispatched() {
        let writer = Arc::new(RecordingWriter::default());
        let d = dispatcher(writer.clone(), 0);

        let mut a = analysis("v1", RecommendedAction::Rebalance);
        a.should_act = false;
        let mut metrics_by_id = HashMap::new();
        metrics_by_id.insert("v1".to_string(), metrics("v1", 100, 100));

        let results = d.execute_all(&[a], &metrics_by_id, &HashMap::new()).await;
        assert!(results.is_empty());
        assert!(writer.claims.lock().is_empty());
        assert!(writer.reserves.lock().is_empty());
    }
}
