//! Monitor loop.
//!
//! Orchestrates one full cycle: refresh the authorized-vault registry,
//! compute health metrics, analyze (batch, highest LTV first), dispatch
//! (batch, severest first), log a summary. Cycles run inline in a single
//! task so they never overlap; a cycle failure is caught at the loop
//! boundary and never kills the schedule.

use crate::analyzer::DecisionEngine;
use crate::chain::ChainReader;
use crate::executor::ActionDispatcher;
use crate::health::classify;
use crate::models::{ltv_bps, VaultHealthMetrics};
use crate::strategy::StrategyResolver;
use crate::throttle::CooldownGate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cycle_interval: Duration,
    /// Registry refreshes more frequent than this are skipped entirely.
    pub registry_refresh_min_interval: Duration,
    /// Asset tag used to value collateral-denominated amounts.
    pub collateral_asset: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            registry_refresh_min_interval: Duration::from_secs(300),
            collateral_asset: "SOL".to_string(),
        }
    }
}

/// Counts reported at the end of every cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub vaults_tracked: usize,
    pub metrics_computed: usize,
    pub actionable: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    vaults: Vec<String>,
    links: HashMap<String, String>,
    last_refresh: Option<Instant>,
}

enum LoopState {
    Stopped,
    Running { stop_tx: watch::Sender<bool> },
}

pub struct MonitorLoop {
    reader: Arc<dyn ChainReader>,
    analyzer: Arc<DecisionEngine>,
    dispatcher: Arc<ActionDispatcher>,
    cooldown: Arc<CooldownGate>,
    strategy: Arc<StrategyResolver>,
    cfg: MonitorConfig,
    registry: Mutex<Registry>,
    state: parking_lot::Mutex<LoopState>,
}

impl MonitorLoop {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        analyzer: Arc<DecisionEngine>,
        dispatcher: Arc<ActionDispatcher>,
        cooldown: Arc<CooldownGate>,
        strategy: Arc<StrategyResolver>,
        cfg: MonitorConfig,
    ) -> Self {
        Self {
            reader,
            analyzer,
            dispatcher,
            cooldown,
            strategy,
            cfg,
            registry: Mutex::new(Registry::default()),
            state: parking_lot::Mutex::new(LoopState::Stopped),
        }
    }

    /// Starts the loop: one cycle immediately, then one per interval.
    /// No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if matches!(*state, LoopState::Running { .. }) {
            info!("monitor loop already running");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let me = self.clone();
        tokio::spawn(me.run(stop_rx));
        *state = LoopState::Running { stop_tx };
        info!(
            interval_secs = self.cfg.cycle_interval.as_secs(),
            "monitor loop started"
        );
    }

    /// Stops scheduling future cycles. An in-flight cycle runs to
    /// completion. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let LoopState::Running { stop_tx, .. } =
            std::mem::replace(&mut *state, LoopState::Stopped)
        {
            let _ = stop_tx.send(true);
            info!("monitor loop stopped");
        }
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.cfg.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // First tick completes immediately; cycles run inline so
                // they can never overlap.
                _ = interval.tick() => {
                    self.run_cycle_guarded().await;
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Cycle boundary: catches and reports any cycle failure so the
    /// schedule is unaffected by the outcome of the previous cycle.
    pub async fn run_cycle_guarded(&self) {
        match self.run_cycle().await {
            Ok(summary) => {
                info!(
                    vaults_tracked = summary.vaults_tracked,
                    metrics_computed = summary.metrics_computed,
                    actionable = summary.actionable,
                    dispatched = summary.dispatched,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "monitor cycle complete"
                );
            }
            Err(e) => {
                error!(error = %e, event = "monitor_cycle_failed", "monitor cycle failed");
            }
        }
    }

    pub async fn run_cycle(&self) -> anyhow::Result<CycleSummary> {
        self.refresh_registry().await;

        let (vaults, links) = {
            let registry = self.registry.lock().await;
            (registry.vaults.clone(), registry.links.clone())
        };

        let mut summary = CycleSummary {
            vaults_tracked: vaults.len(),
            ..Default::default()
        };

        let metrics = self.compute_metrics(&vaults, &links).await;
        summary.metrics_computed = metrics.len();

        let metrics_by_id: HashMap<String, VaultHealthMetrics> = metrics
            .iter()
            .map(|m| (m.vault_id.clone(), m.clone()))
            .collect();

        let analyses = self.analyzer.analyze_all(metrics).await;
        summary.actionable = analyses.iter().filter(|a| a.should_act).count();

        let results = self
            .dispatcher
            .execute_all(&analyses, &metrics_by_id, &links)
            .await;
        summary.dispatched = results.len();
        summary.succeeded = results.iter().filter(|r| r.success).count();
        summary.failed = results.len() - summary.succeeded;

        Ok(summary)
    }

    /// Throttled registry refresh. An early refresh is skipped entirely,
    /// including the cooldown cleanup that rides along with it. Read
    /// failures keep the previous registry.
    async fn refresh_registry(&self) {
        let mut registry = self.registry.lock().await;
        if let Some(at) = registry.last_refresh {
            if at.elapsed() < self.cfg.registry_refresh_min_interval {
                return;
            }
        }

        let vaults = match self.reader.get_authorized_vaults().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "authorized vault refresh failed, keeping previous registry");
                return;
            }
        };
        let links = match self.reader.get_auto_rebalance_links().await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "auto-rebalance link refresh failed, keeping previous registry");
                return;
            }
        };

        info!(
            vaults = vaults.len(),
            links = links.len(),
            "vault registry refreshed"
        );
        registry.vaults = vaults;
        registry.links = links;
        registry.last_refresh = Some(Instant::now());

        self.cooldown.cleanup();
    }

    /// Computes a metrics snapshot per vault. Any read failure skips the
    /// vault for this cycle; it will be retried naturally on the next one.
    async fn compute_metrics(
        &self,
        vaults: &[String],
        links: &HashMap<String, String>,
    ) -> Vec<VaultHealthMetrics> {
        let price = match self.reader.get_price(&self.cfg.collateral_asset).await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    asset = %self.cfg.collateral_asset,
                    error = %e,
                    "price fetch failed, skipping all vaults this cycle"
                );
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(vaults.len());
        for vault_id in vaults {
            let state = match self.reader.get_vault(vault_id).await {
                Ok(Some(s)) => s,
                Ok(None) => {
                    warn!(vault_id, "vault not found on chain, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(vault_id, error = %e, "vault read failed, skipping");
                    continue;
                }
            };

            let pending_rewards = match links.get(vault_id) {
                Some(position_id) => match self.reader.get_pending_rewards(position_id).await {
                    Ok(p) => value_of(p, price),
                    Err(e) => {
                        warn!(vault_id, position_id, error = %e, "pending reward read failed, treating as 0");
                        0
                    }
                },
                None => 0,
            };

            let collateral_value = value_of(state.collateral_amount, price);
            let debt_value = state.debt_amount;
            let ltv = ltv_bps(debt_value, collateral_value);

            let profile = self.strategy.resolve_profile(&state.owner).await;
            let (tier, recommended) = classify(ltv, &profile);

            out.push(VaultHealthMetrics {
                vault_id: vault_id.clone(),
                owner: state.owner,
                collateral_value,
                debt_value,
                ltv_bps: ltv,
                tier,
                reward_reserve: value_of(state.reward_reserve, price),
                pending_rewards,
                recommended,
            });
        }
        out
    }
}

/// Values a collateral-denominated amount with an 8-decimal price.
fn value_of(amount: u64, price: u64) -> u64 {
    (amount as u128 * price as u128 / 100_000_000) as u64
}
