//! Wiring shared by the long-running and single-shot binaries.

use crate::analyzer::DecisionEngine;
use crate::chain::{ChainReader, ChainWriter, HttpChainReader, HttpChainWriter, PaperChainWriter};
use crate::config::AppConfig;
use crate::executor::ActionDispatcher;
use crate::llm::{OpenRouterClient, ReasoningBackend};
use crate::monitor::{MonitorConfig, MonitorLoop};
use crate::strategy::StrategyResolver;
use crate::throttle::{CooldownGate, RateLimiter};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Builds the fully wired monitor from configuration.
pub fn build_monitor(cfg: &AppConfig) -> Result<Arc<MonitorLoop>> {
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let mut reader = HttpChainReader::new(http_client.clone(), cfg.rpc_url.clone());
    match &cfg.price_feed_address {
        Some(addr) => reader = reader.with_price_feed(&cfg.collateral_asset, addr),
        None => warn!(
            asset = %cfg.collateral_asset,
            "no price feed configured (VAULTGUARD_PRICE_FEED), vaults cannot be valued"
        ),
    }
    let reader: Arc<dyn ChainReader> = Arc::new(reader);

    let writer: Arc<dyn ChainWriter> = if cfg.dry_run {
        info!("running in DRY RUN mode, no transactions will be submitted");
        Arc::new(PaperChainWriter)
    } else {
        info!("running in LIVE mode");
        Arc::new(HttpChainWriter::new(http_client.clone(), cfg.rpc_url.clone()))
    };

    let llm: Option<Arc<dyn ReasoningBackend>> = if cfg.llm_enabled {
        let client = OpenRouterClient::from_env(http_client)
            .context("VAULTGUARD_LLM_ENABLED=1 but reasoning backend env incomplete")?;
        Some(Arc::new(client))
    } else {
        info!("reasoning backend disabled, using deterministic rules only");
        None
    };

    let mut strategy = StrategyResolver::new(
        cfg.default_profile,
        Duration::from_secs(cfg.strategy_ttl_secs),
    );
    if let Some(spec) = &cfg.owner_strategies {
        strategy = strategy.with_assignments(spec);
    }
    let strategy = Arc::new(strategy);

    let rate_limiter = Arc::new(
        RateLimiter::new(cfg.analyzer_calls_per_minute)
            .with_cap("analyzer", cfg.analyzer_calls_per_minute)
            .with_cap("executor", cfg.executor_calls_per_minute),
    );
    let cooldown = Arc::new(CooldownGate::new(cfg.cooldown_secs));

    let analyzer = Arc::new(DecisionEngine::new(
        strategy.clone(),
        rate_limiter.clone(),
        llm.clone(),
    ));
    let dispatcher = Arc::new(ActionDispatcher::new(
        cooldown.clone(),
        rate_limiter,
        writer,
        llm,
    ));

    Ok(Arc::new(MonitorLoop::new(
        reader,
        analyzer,
        dispatcher,
        cooldown,
        strategy,
        MonitorConfig {
            cycle_interval: Duration::from_secs(cfg.cycle_interval_secs),
            registry_refresh_min_interval: Duration::from_secs(cfg.registry_refresh_min_secs),
            collateral_asset: cfg.collateral_asset.clone(),
        },
    )))
}
