//! Health classification
//!
//! Pure mapping from an LTV (basis points) and a threshold profile to a
//! health tier plus a default recommended action. Boundaries are inclusive
//! and evaluated from most to least severe, first match wins.

use crate::models::{HealthTier, RecommendedAction, ThresholdProfile};

pub fn classify(ltv_bps: u64, profile: &ThresholdProfile) -> (HealthTier, RecommendedAction) {
    if ltv_bps >= profile.liquidation_bps {
        (HealthTier::Liquidatable, RecommendedAction::UrgentRebalance)
    } else if ltv_bps >= profile.max_borrow_bps {
        (HealthTier::Critical, RecommendedAction::UrgentRebalance)
    } else if ltv_bps >= profile.rebalance_bps {
        (HealthTier::AtRisk, RecommendedAction::Rebalance)
    } else if ltv_bps >= profile.warning_bps {
        (HealthTier::Warning, RecommendedAction::ClaimRewards)
    } else {
        (HealthTier::Healthy, RecommendedAction::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ThresholdProfile {
        ThresholdProfile {
            warning_bps: 6000,
            rebalance_bps: 6500,
            max_borrow_bps: 7000,
            liquidation_bps: 8000,
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        let p = profile();
        assert_eq!(classify(5999, &p).0, HealthTier::Healthy);
        assert_eq!(classify(6000, &p).0, HealthTier::Warning);
        assert_eq!(classify(6499, &p).0, HealthTier::Warning);
        assert_eq!(classify(6500, &p).0, HealthTier::AtRisk);
        assert_eq!(classify(6999, &p).0, HealthTier::AtRisk);
        assert_eq!(classify(7000, &p).0, HealthTier::Critical);
        assert_eq!(classify(7999, &p).0, HealthTier::Critical);
        assert_eq!(classify(8000, &p).0, HealthTier::Liquidatable);
    }

    #[test]
    fn actions_match_tiers() {
        let p = profile();
        assert_eq!(classify(1000, &p), (HealthTier::Healthy, RecommendedAction::None));
        assert_eq!(
            classify(6200, &p),
            (HealthTier::Warning, RecommendedAction::ClaimRewards)
        );
        assert_eq!(
            classify(6800, &p),
            (HealthTier::AtRisk, RecommendedAction::Rebalance)
        );
        assert_eq!(
            classify(7500, &p),
            (HealthTier::Critical, RecommendedAction::UrgentRebalance)
        );
        assert_eq!(
            classify(8500, &p),
            (HealthTier::Liquidatable, RecommendedAction::UrgentRebalance)
        );
    }

    #[test]
    fn tier_is_non_decreasing_in_ltv() {
        let p = profile();
        let mut last = HealthTier::Healthy;
        for ltv in (0..10_000).step_by(10) {
            let (tier, _) = classify(ltv, &p);
            assert!(tier >= last, "tier regressed at ltv {ltv}");
            last = tier;
        }
    }
}
