//! Single-shot entry point: runs exactly one monitor cycle and exits.
//! Useful for cron-style scheduling and operational smoke checks.

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

    let monitor = build_monitor(&cfg)?;
    let summary = monitor.run_cycle().await?;

    info!(
        vaults_tracked = summary.vaults_tracked,
        metrics_computed = summary.metrics_computed,
        actionable = summary.actionable,
        dispatched = summary.dispatched,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "single cycle complete"
    );

    Ok(())
}
