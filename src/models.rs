use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discrete risk bucket for a vault, derived from its LTV versus a
/// [`ThresholdProfile`]. Ordering is by increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthTier {
    Healthy,
    Warning,
    AtRisk,
    Critical,
    Liquidatable,
}

impl HealthTier {
    pub fn as_str(&self) -> &str {
        match self {
            HealthTier::Healthy => "healthy",
            HealthTier::Warning => "warning",
            HealthTier::AtRisk => "at_risk",
            HealthTier::Critical => "critical",
            HealthTier::Liquidatable => "liquidatable",
        }
    }
}

/// Corrective action recommended for a vault. Ordering is by increasing
/// severity; the dispatcher processes the severest actions first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    None,
    Monitor,
    ClaimRewards,
    Rebalance,
    UrgentRebalance,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &str {
        match self {
            RecommendedAction::None => "NONE",
            RecommendedAction::Monitor => "MONITOR",
            RecommendedAction::ClaimRewards => "CLAIM_REWARDS",
            RecommendedAction::Rebalance => "REBALANCE",
            RecommendedAction::UrgentRebalance => "URGENT_REBALANCE",
        }
    }

    /// Parses an action string from the reasoning backend. Unknown strings
    /// map to `None` so a creative model answer can never trigger a write.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "MONITOR" => Self::Monitor,
            "CLAIM_REWARDS" => Self::ClaimRewards,
            "REBALANCE" => Self::Rebalance,
            "URGENT_REBALANCE" => Self::UrgentRebalance,
            _ => Self::None,
        }
    }

    /// Dispatch priority: higher dispatches first within a cycle.
    pub fn severity(&self) -> u8 {
        match self {
            RecommendedAction::None => 0,
            RecommendedAction::Monitor => 1,
            RecommendedAction::ClaimRewards => 2,
            RecommendedAction::Rebalance => 3,
            RecommendedAction::UrgentRebalance => 4,
        }
    }
}

/// Per-owner LTV boundaries in basis points. Invariant (enforced by the
/// strategy resolver, trusted here): warning < rebalance < max_borrow <
/// liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub warning_bps: u64,
    pub rebalance_bps: u64,
    pub max_borrow_bps: u64,
    pub liquidation_bps: u64,
}

impl ThresholdProfile {
    pub fn is_monotonic(&self) -> bool {
        self.warning_bps < self.rebalance_bps
            && self.rebalance_bps < self.max_borrow_bps
            && self.max_borrow_bps < self.liquidation_bps
    }
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self {
            warning_bps: 6000,
            rebalance_bps: 6500,
            max_borrow_bps: 7000,
            liquidation_bps: 8000,
        }
    }
}

/// Snapshot of one vault's health, recomputed every monitor cycle.
/// Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultHealthMetrics {
    pub vault_id: String,
    pub owner: String,
    pub collateral_value: u64,
    pub debt_value: u64,
    /// debt / collateral in basis points (1bp = 0.01%); 0 when collateral is 0.
    pub ltv_bps: u64,
    pub tier: HealthTier,
    pub reward_reserve: u64,
    pub pending_rewards: u64,
    pub recommended: RecommendedAction,
}

/// Computes LTV in basis points. Zero collateral maps to 0 rather than
/// infinity; such vaults carry no debt risk the classifier can price.
pub fn ltv_bps(debt_value: u64, collateral_value: u64) -> u64 {
    if collateral_value == 0 {
        return 0;
    }
    (debt_value as u128 * 10_000 / collateral_value as u128) as u64
}

/// Analyzer output for one vault. Created once per cycle, consumed once by
/// the dispatcher, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub vault_id: String,
    pub should_act: bool,
    pub action: RecommendedAction,
    pub reasoning: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Additional collateral needed to reach the target LTV.
    pub estimated_rewards_needed: u64,
    /// pending_rewards + reward_reserve.
    pub available_rewards: u64,
}

/// Terminal outcome of one dispatch attempt. Logged and discarded; never
/// retried within the same cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub vault_id: String,
    pub success: bool,
    pub action: String,
    pub tx_ref: Option<String>,
    pub amount_moved: u64,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn failure(vault_id: &str, action: &str, error: impl Into<String>) -> Self {
        Self {
            vault_id: vault_id.to_string(),
            success: false,
            action: action.to_string(),
            tx_ref: None,
            amount_moved: 0,
            error: Some(error.into()),
            executed_at: Utc::now(),
        }
    }
}
