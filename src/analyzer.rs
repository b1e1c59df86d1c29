//! Decision engine.
//!
//! Turns per-vault health metrics into a structured recommendation, either
//! by asking the reasoning backend and validating its JSON answer, or by a
//! deterministic rule set when the backend is absent, fails, or replies
//! with something unparseable. The numeric estimates are always computed
//! locally; the backend only ever influences the act/no-act decision.

use crate::llm::{extract_json_object, ReasoningBackend};
use crate::models::{AnalysisResult, RecommendedAction, ThresholdProfile, VaultHealthMetrics};
use crate::strategy::StrategyResolver;
use crate::throttle::RateLimiter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rebalancing aims the vault at this LTV.
pub const TARGET_LTV_BPS: u64 = 5500;

/// Confidence attached to deterministic fallback decisions.
const FALLBACK_CONFIDENCE: f64 = 0.9;

pub struct DecisionEngine {
    strategy: Arc<StrategyResolver>,
    rate_limiter: Arc<RateLimiter>,
    llm: Option<Arc<dyn ReasoningBackend>>,
}

/// Collateral still missing to bring the vault down to [`TARGET_LTV_BPS`].
pub fn estimated_rewards_needed(debt_value: u64, collateral_value: u64) -> u64 {
    let required = debt_value as u128 * 10_000 / TARGET_LTV_BPS as u128;
    required.saturating_sub(collateral_value as u128) as u64
}

impl DecisionEngine {
    pub fn new(
        strategy: Arc<StrategyResolver>,
        rate_limiter: Arc<RateLimiter>,
        llm: Option<Arc<dyn ReasoningBackend>>,
    ) -> Self {
        Self {
            strategy,
            rate_limiter,
            llm,
        }
    }

    /// Analyzes a batch, highest LTV first, so the riskiest vaults get
    /// through the rate-limited backend before quota pressure builds.
    pub async fn analyze_all(&self, mut metrics: Vec<VaultHealthMetrics>) -> Vec<AnalysisResult> {
        metrics.sort_by(|a, b| b.ltv_bps.cmp(&a.ltv_bps));

        let mut results = Vec::with_capacity(metrics.len());
        for m in &metrics {
            results.push(self.analyze(m).await);
        }
        results
    }

    pub async fn analyze(&self, metrics: &VaultHealthMetrics) -> AnalysisResult {
        let profile = self.strategy.resolve_profile(&metrics.owner).await;

        let decision = match &self.llm {
            Some(llm) => {
                self.rate_limiter.admit("analyzer").await;
                match self.ask_backend(llm.as_ref(), metrics, &profile).await {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!(
                            vault_id = %metrics.vault_id,
                            error = %e,
                            "analyzer backend failed, using fallback rules"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let (should_act, action, reasoning, confidence) = match decision {
            Some(d) => d,
            None => fallback_decision(metrics, &profile),
        };

        AnalysisResult {
            vault_id: metrics.vault_id.clone(),
            should_act,
            action,
            reasoning,
            confidence,
            estimated_rewards_needed: estimated_rewards_needed(
                metrics.debt_value,
                metrics.collateral_value,
            ),
            available_rewards: metrics.pending_rewards + metrics.reward_reserve,
        }
    }

    async fn ask_backend(
        &self,
        llm: &dyn ReasoningBackend,
        metrics: &VaultHealthMetrics,
        profile: &ThresholdProfile,
    ) -> anyhow::Result<(bool, RecommendedAction, String, f64)> {
        let system = "You are a DeFi vault risk analyst. Given vault health metrics and the \
                      owner's threshold profile, decide whether corrective action is required. \
                      Respond with a single JSON object: {\"shouldAct\": bool, \"action\": \
                      \"NONE\"|\"MONITOR\"|\"CLAIM_REWARDS\"|\"REBALANCE\"|\"URGENT_REBALANCE\", \
                      \"confidence\": number, \"reasoning\": string}.";

        let user = format!(
            "Vault {id}\n\
             LTV: {ltv} bps (tier: {tier})\n\
             Collateral value: {collateral}\n\
             Debt value: {debt}\n\
             Pending rewards: {pending}\n\
             Reward reserve: {reserve}\n\
             Thresholds (bps): warning={warn}, rebalance={reb}, max_borrow={maxb}, liquidation={liq}",
            id = metrics.vault_id,
            ltv = metrics.ltv_bps,
            tier = metrics.tier.as_str(),
            collateral = metrics.collateral_value,
            debt = metrics.debt_value,
            pending = metrics.pending_rewards,
            reserve = metrics.reward_reserve,
            warn = profile.warning_bps,
            reb = profile.rebalance_bps,
            maxb = profile.max_borrow_bps,
            liq = profile.liquidation_bps,
        );

        let raw = llm.complete(system, &user).await?;
        let parsed = extract_json_object(&raw)
            .ok_or_else(|| anyhow::anyhow!("no JSON object in backend reply"))?;

        let should_act = parsed
            .get("shouldAct")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let action = parsed
            .get("action")
            .and_then(|v| v.as_str())
            .map(RecommendedAction::parse)
            .unwrap_or(RecommendedAction::None);
        let confidence = parsed
            .get("confidence")
            .and_then(|v| v.as_f64())
            .filter(|c| c.is_finite())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let reasoning = parsed
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("(no reasoning provided)")
            .chars()
            .take(512)
            .collect::<String>();

        debug!(
            vault_id = %metrics.vault_id,
            should_act,
            action = action.as_str(),
            confidence,
            "backend analysis"
        );

        Ok((should_act, action, reasoning, confidence))
    }
}

/// Deterministic rule set mirroring the classifier thresholds. Funds-gated
/// tiers only act when there is something to move.
fn fallback_decision(
    metrics: &VaultHealthMetrics,
    profile: &ThresholdProfile,
) -> (bool, RecommendedAction, String, f64) {
    let funds_available = metrics.pending_rewards > 0 || metrics.reward_reserve > 0;
    let ltv = metrics.ltv_bps;

    let (should_act, action, reasoning) = if ltv >= profile.liquidation_bps {
        (
            true,
            RecommendedAction::UrgentRebalance,
            "liquidation risk".to_string(),
        )
    } else if ltv >= profile.max_borrow_bps {
        (
            true,
            RecommendedAction::UrgentRebalance,
            "exceeds max borrow".to_string(),
        )
    } else if ltv >= profile.rebalance_bps {
        (
            funds_available,
            RecommendedAction::Rebalance,
            "above rebalance threshold".to_string(),
        )
    } else if ltv >= profile.warning_bps {
        (
            funds_available,
            RecommendedAction::ClaimRewards,
            "above warning threshold".to_string(),
        )
    } else if funds_available {
        (
            true,
            RecommendedAction::ClaimRewards,
            "compounding".to_string(),
        )
    } else {
        (false, RecommendedAction::None, "healthy".to_string())
    };

    (should_act, action, reasoning, FALLBACK_CONFIDENCE)
}
