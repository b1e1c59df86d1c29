//! Vaultguard - automated vault health monitor
//!
//! Watches a set of collateralized vaults, classifies their health against
//! per-owner LTV thresholds, and dispatches at most one corrective action
//! per vault per cooldown window.

use anyhow::Result;
use tracing::info;
use vaultguard::bootstrap::{build_monitor, init_tracing};
use vaultguard::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "configuration load failed");
            std::process::exit(1);
        }
    };

    info!(
        interval_secs = cfg.cycle_interval_secs,
        cooldown_secs = cfg.cooldown_secs,
        dry_run = cfg.dry_run,
        llm_enabled = cfg.llm_enabled,
        "vaultguard starting"
    );

    let monitor = build_monitor(&cfg)?;
    monitor.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    monitor.stop();

    Ok(())
}
