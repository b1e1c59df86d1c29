//! Environment-based configuration.
//!
//! Everything tunable comes from env vars (with `.env` support). Values that
//! fail to parse fall back to their defaults; genuinely required settings
//! missing is a fatal configuration error surfaced at startup.

use crate::models::ThresholdProfile;
use anyhow::{anyhow, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cycle_interval_secs: u64,
    pub registry_refresh_min_secs: u64,
    pub cooldown_secs: u64,
    pub analyzer_calls_per_minute: usize,
    pub executor_calls_per_minute: usize,
    pub default_profile: ThresholdProfile,
    pub strategy_ttl_secs: u64,
    /// "owner:preset,owner:preset" static strategy assignments.
    pub owner_strategies: Option<String>,
    pub collateral_asset: String,
    pub rpc_url: String,
    /// Aggregator contract for the collateral asset price.
    pub price_feed_address: Option<String>,
    pub dry_run: bool,
    pub llm_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            registry_refresh_min_secs: 300,
            cooldown_secs: 300,
            analyzer_calls_per_minute: 10,
            executor_calls_per_minute: 10,
            default_profile: ThresholdProfile::default(),
            strategy_ttl_secs: 600,
            owner_strategies: None,
            collateral_asset: "SOL".to_string(),
            rpc_url: String::new(),
            price_feed_address: None,
            dry_run: true,
            llm_enabled: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut cfg = Self::default();

        cfg.cycle_interval_secs = env::var("VAULTGUARD_INTERVAL_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(cfg.cycle_interval_secs);

        cfg.registry_refresh_min_secs = env::var("VAULTGUARD_REGISTRY_REFRESH_MIN_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(cfg.registry_refresh_min_secs);

        cfg.cooldown_secs = env::var("VAULTGUARD_COOLDOWN_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(cfg.cooldown_secs);

        cfg.analyzer_calls_per_minute = env::var("VAULTGUARD_ANALYZER_CALLS_PER_MIN")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(cfg.analyzer_calls_per_minute);

        cfg.executor_calls_per_minute = env::var("VAULTGUARD_EXECUTOR_CALLS_PER_MIN")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(cfg.executor_calls_per_minute);

        let bps = |var: &str, default: u64| -> u64 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v <= 10_000)
                .unwrap_or(default)
        };
        cfg.default_profile = ThresholdProfile {
            warning_bps: bps("VAULTGUARD_WARNING_BPS", cfg.default_profile.warning_bps),
            rebalance_bps: bps("VAULTGUARD_REBALANCE_BPS", cfg.default_profile.rebalance_bps),
            max_borrow_bps: bps(
                "VAULTGUARD_MAX_BORROW_BPS",
                cfg.default_profile.max_borrow_bps,
            ),
            liquidation_bps: bps(
                "VAULTGUARD_LIQUIDATION_BPS",
                cfg.default_profile.liquidation_bps,
            ),
        };
        if !cfg.default_profile.is_monotonic() {
            return Err(anyhow!(
                "default threshold profile must be strictly increasing: {:?}",
                cfg.default_profile
            ));
        }

        cfg.strategy_ttl_secs = env::var("VAULTGUARD_STRATEGY_TTL_SEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v >= 1)
            .unwrap_or(cfg.strategy_ttl_secs);

        cfg.owner_strategies = env::var("VAULTGUARD_OWNER_STRATEGIES")
            .ok()
            .filter(|s| !s.trim().is_empty());

        cfg.collateral_asset = env::var("VAULTGUARD_COLLATERAL_ASSET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(cfg.collateral_asset);

        cfg.dry_run = env::var("VAULTGUARD_DRY_RUN")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(cfg.dry_run);

        cfg.llm_enabled = env::var("VAULTGUARD_LLM_ENABLED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(cfg.llm_enabled);

        cfg.rpc_url = env::var("VAULTGUARD_RPC_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("VAULTGUARD_RPC_URL missing (set env var)"))?;

        cfg.price_feed_address = env::var("VAULTGUARD_PRICE_FEED")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var based tests mutate process state; keep them in one test so
    // they cannot race each other.
    #[test]
    fn from_env_requires_rpc_and_validates_thresholds() {
        env::remove_var("VAULTGUARD_RPC_URL");
        assert!(AppConfig::from_env().is_err());

        env::set_var("VAULTGUARD_RPC_URL", "http://localhost:8899");
        env::set_var("VAULTGUARD_INTERVAL_SEC", "15");
        env::set_var("VAULTGUARD_COOLDOWN_SEC", "120");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.cycle_interval_secs, 15);
        assert_eq!(cfg.cooldown_secs, 120);
        assert!(cfg.dry_run);

        // Non-monotonic thresholds are a fatal configuration error.
        env::set_var("VAULTGUARD_WARNING_BPS", "9000");
        assert!(AppConfig::from_env().is_err());
        env::remove_var("VAULTGUARD_WARNING_BPS");

        // Garbage numerics fall back to defaults.
        env::set_var("VAULTGUARD_ANALYZER_CALLS_PER_MIN", "lots");
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.analyzer_calls_per_minute, 10);

        env::remove_var("VAULTGUARD_RPC_URL");
        env::remove_var("VAULTGUARD_INTERVAL_SEC");
        env::remove_var("VAULTGUARD_COOLDOWN_SEC");
        env::remove_var("VAULTGUARD_ANALYZER_CALLS_PER_MIN");
    }
}
