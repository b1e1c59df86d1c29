//! End-to-end monitor cycle tests.
//!
//! Drives the full refresh -> metrics -> analyze -> dispatch pipeline
//! against in-memory chain and reasoning-backend mocks, under paused tokio
//! time so cooldown and refresh-throttle windows are exact.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

use vaultguard::analyzer::DecisionEngine;
use vaultguard::chain::{ChainReader, ChainWriter, TxOutcome, VaultState};
use vaultguard::executor::ActionDispatcher;
use vaultguard::llm::{ReasoningBackend, ToolInvocation, ToolSpec};
use vaultguard::models::ThresholdProfile;
use vaultguard::monitor::{MonitorConfig, MonitorLoop};
use vaultguard::strategy::StrategyResolver;
use vaultguard::throttle::{CooldownGate, RateLimiter};

const PRICE_IDENTITY: u64 = 100_000_000; // 8-decimal 1.0

#[derive(Default)]
struct MockChain {
    vaults: Mutex<HashMap<String, VaultState>>,
    links: Mutex<HashMap<String, String>>,
    pending: Mutex<HashMap<String, u64>>,
    registry_reads: AtomicUsize,
    vault_read_fails: Mutex<Vec<String>>,
    fail_registry: AtomicBool,
}

impl MockChain {
    fn add_vault(
        &self,
        id: &str,
        owner: &str,
        collateral: u64,
        debt: u64,
        reserve: u64,
        linked: Option<(&str, u64)>,
    ) {
        self.vaults.lock().insert(
            id.to_string(),
            VaultState {
                owner: owner.to_string(),
                collateral_amount: collateral,
                debt_amount: debt,
                reward_reserve: reserve,
            },
        );
        if let Some((position, rewards)) = linked {
            self.links.lock().insert(id.to_string(), position.to_string());
            self.pending.lock().insert(position.to_string(), rewards);
        }
    }
}

#[async_trait::async_trait]
impl ChainReader for MockChain {
    async fn get_vault(&self, vault_id: &str) -> anyhow::Result<Option<VaultState>> {
        if self.vault_read_fails.lock().iter().any(|v| v == vault_id) {
            anyhow::bail!("rpc timeout reading {vault_id}");
        }
        Ok(self.vaults.lock().get(vault_id).map(|v| VaultState {
            owner: v.owner.clone(),
            collateral_amount: v.collateral_amount,
            debt_amount: v.debt_amount,
            reward_reserve: v.reward_reserve,
        }))
    }

    async fn get_linked_position(&self, vault_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.links.lock().get(vault_id).cloned())
    }

    async fn get_pending_rewards(&self, position_id: &str) -> anyhow::Result<u64> {
        Ok(self.pending.lock().get(position_id).copied().unwrap_or(0))
    }

    async fn get_authorized_vaults(&self) -> anyhow::Result<Vec<String>> {
        if self.fail_registry.load(Ordering::SeqCst) {
            anyhow::bail!("registry endpoint down");
        }
        self.registry_reads.fetch_add(1, Ordering::SeqCst);
        let mut ids: Vec<String> = self.vaults.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_auto_rebalance_links(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.links.lock().clone())
    }

    async fn get_price(&self, _asset: &str) -> anyhow::Result<u64> {
        Ok(PRICE_IDENTITY)
    }
}

#[derive(Default)]
struct MockWriter {
    claims: Mutex<Vec<(String, String)>>,
    reserves: Mutex<Vec<String>>,
}

impl MockWriter {
    fn writes(&self) -> usize {
        self.claims.lock().len() + self.reserves.lock().len()
    }
}

#[async_trait::async_trait]
impl ChainWriter for MockWriter {
    async fn submit_claim_and_rebalance(
        &self,
        position_id: &str,
        vault_id: &str,
    ) -> anyhow::Result<TxOutcome> {
        self.claims
            .lock()
            .push((position_id.to_string(), vault_id.to_string()));
        Ok(TxOutcome {
            tx_ref: format!("0xclaim_{vault_id}"),
            amount_moved: 1_000,
        })
    }

    async fn submit_rebalance_from_reserve(&self, vault_id: &str) -> anyhow::Result<TxOutcome> {
        self.reserves.lock().push(vault_id.to_string());
        Ok(TxOutcome {
            tx_ref: format!("0xreserve_{vault_id}"),
            amount_moved: 500,
        })
    }
}

/// Backend that replies with prose no JSON extractor can use, to force the
/// deterministic paths, or with a canned tool call.
struct NoisyBackend;

#[async_trait::async_trait]
impl ReasoningBackend for NoisyBackend {
    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        Ok("Well, it depends on many market factors...".to_string())
    }

    async fn complete_forced_tool(
        &self,
        _system: &str,
        _user: &str,
        _tools: &[ToolSpec],
    ) -> anyhow::Result<Option<ToolInvocation>> {
        anyhow::bail!("backend unavailable")
    }
}

struct Harness {
    chain: Arc<MockChain>,
    writer: Arc<MockWriter>,
    monitor: Arc<MonitorLoop>,
    cooldown: Arc<CooldownGate>,
}

fn harness(cooldown_secs: u64, llm: Option<Arc<dyn ReasoningBackend>>) -> Harness {
    let chain = Arc::new(MockChain::default());
    let writer = Arc::new(MockWriter::default());
    let strategy = Arc::new(StrategyResolver::new(
        ThresholdProfile::default(),
        std::time::Duration::from_secs(600),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(1000));
    let cooldown = Arc::new(CooldownGate::new(cooldown_secs));

    let analyzer = Arc::new(DecisionEngine::new(
        strategy.clone(),
        rate_limiter.clone(),
        llm.clone(),
    ));
    let dispatcher = Arc::new(ActionDispatcher::new(
        cooldown.clone(),
        rate_limiter,
        writer.clone(),
        llm,
    ));
    let monitor = Arc::new(MonitorLoop::new(
        chain.clone(),
        analyzer,
        dispatcher,
        cooldown.clone(),
        strategy,
        MonitorConfig {
            cycle_interval: Duration::from_secs(60),
            registry_refresh_min_interval: Duration::from_secs(300),
            collateral_asset: "SOL".to_string(),
        },
    ));

    Harness {
        chain,
        writer,
        monitor,
        cooldown,
    }
}

#[tokio::test(start_paused = true)]
async fn full_cycle_classifies_analyzes_and_dispatches() {
    let h = harness(300, None);
    // 8500 bps, empty reserve but linked rewards -> urgent, claim path.
    h.chain.add_vault("liq", "owner-a", 10_000, 8_500, 0, Some(("pos-liq", 700)));
    // 4500 bps with pending rewards -> healthy but compounds.
    h.chain.add_vault("healthy-funds", "owner-b", 10_000, 4_500, 0, Some(("pos-h", 200)));
    // 4000 bps, nothing to move -> no action at all.
    h.chain.add_vault("idle", "owner-c", 10_000, 4_000, 0, None);

    let summary = h.monitor.run_cycle().await.unwrap();
    assert_eq!(summary.vaults_tracked, 3);
    assert_eq!(summary.metrics_computed, 3);
    assert_eq!(summary.actionable, 2);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);

    // Severity order: urgent claim for "liq" before compounding claim.
    assert_eq!(
        h.writer.claims.lock().as_slice(),
        &[
            ("pos-liq".to_string(), "liq".to_string()),
            ("pos-h".to_string(), "healthy-funds".to_string()),
        ]
    );
    assert!(h.writer.reserves.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cooldown_blocks_second_cycle_and_reopens_after_window() {
    let h = harness(300, None);
    h.chain.add_vault("v1", "owner-a", 10_000, 8_500, 2_000, None);

    // t=0: urgent rebalance from reserve goes through.
    let s0 = h.monitor.run_cycle().await.unwrap();
    assert_eq!(s0.succeeded, 1);
    assert_eq!(h.writer.writes(), 1);
    assert!(!h.cooldown.can_act("v1"));

    // t=120: still on cooldown, zero new writes, reported as failure.
    tokio::time::advance(Duration::from_secs(120)).await;
    let s1 = h.monitor.run_cycle().await.unwrap();
    assert_eq!(s1.dispatched, 1);
    assert_eq!(s1.failed, 1);
    assert_eq!(h.writer.writes(), 1);

    // t=301: cooldown elapsed, dispatch allowed again.
    tokio::time::advance(Duration::from_secs(181)).await;
    let s2 = h.monitor.run_cycle().await.unwrap();
    assert_eq!(s2.succeeded, 1);
    assert_eq!(h.writer.writes(), 2);
}

#[tokio::test(start_paused = true)]
async fn registry_refresh_is_throttled() {
    let h = harness(0, None);
    h.chain.add_vault("v1", "owner-a", 10_000, 1_000, 0, None);

    h.monitor.run_cycle().await.unwrap();
    assert_eq!(h.chain.registry_reads.load(Ordering::SeqCst), 1);

    // 60s later: under the 300s minimum, refresh skipped entirely.
    tokio::time::advance(Duration::from_secs(60)).await;
    h.monitor.run_cycle().await.unwrap();
    assert_eq!(h.chain.registry_reads.load(Ordering::SeqCst), 1);

    // Past the minimum: refreshed again.
    tokio::time::advance(Duration::from_secs(241)).await;
    h.monitor.run_cycle().await.unwrap();
    assert_eq!(h.chain.registry_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn vault_read_failure_skips_only_that_vault() {
    let h = harness(0, None);
    h.chain.add_vault("good", "owner-a", 10_000, 8_500, 1_000, None);
    h.chain.add_vault("bad", "owner-b", 10_000, 8_500, 1_000, None);
    h.chain.vault_read_fails.lock().push("bad".to_string());

    let summary = h.monitor.run_cycle().await.unwrap();
    assert_eq!(summary.vaults_tracked, 2);
    assert_eq!(summary.metrics_computed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.writer.reserves.lock().as_slice(), &["good".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn registry_failure_keeps_previous_registry_and_cycle_survives() {
    let h = harness(0, None);
    h.chain.add_vault("v1", "owner-a", 10_000, 8_500, 1_000, None);

    h.monitor.run_cycle().await.unwrap();
    assert_eq!(h.writer.writes(), 1);

    // Registry endpoint dies; the previous vault list keeps being served.
    h.chain.fail_registry.store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(301)).await;
    let summary = h.monitor.run_cycle().await.unwrap();
    assert_eq!(summary.vaults_tracked, 1);
    assert_eq!(summary.succeeded, 1);

    // The guarded wrapper never panics either way.
    h.monitor.run_cycle_guarded().await;
}

#[tokio::test(start_paused = true)]
async fn unusable_backend_falls_back_to_deterministic_paths() {
    let h = harness(0, Some(Arc::new(NoisyBackend)));
    h.chain.add_vault("v1", "owner-a", 10_000, 8_500, 2_000, None);

    let summary = h.monitor.run_cycle().await.unwrap();
    // Analysis fell back to rules (urgent), execution fell back to the
    // local three-way policy (reserve present -> rebalance_from_reserve).
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.writer.reserves.lock().as_slice(), &["v1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_stop_prevents_future_cycles() {
    let h = harness(0, None);
    h.chain.add_vault("v1", "owner-a", 10_000, 1_000, 0, None);

    h.monitor.start();
    h.monitor.start(); // no-op
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.chain.registry_reads.load(Ordering::SeqCst), 1);

    h.monitor.stop();
    h.monitor.stop(); // idempotent
    tokio::time::sleep(Duration::from_secs(600)).await;
    // No further refreshes were scheduled after stop.
    assert!(h.chain.registry_reads.load(Ordering::SeqCst) <= 2);
}
