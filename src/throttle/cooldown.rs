//! Per-vault action cooldown.
//!
//! Tracks the last corrective action per vault and refuses a new one until
//! the configured interval has elapsed. Callers must check `can_act` before
//! `record_action`; the gate does not re-check itself.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

pub struct CooldownGate {
    cooldown: Duration,
    last_action: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::from_secs(cooldown_secs),
            last_action: Mutex::new(HashMap::new()),
        }
    }

    /// True if the vault has no recorded action or its cooldown has elapsed.
    /// A zero cooldown disables gating entirely.
    pub fn can_act(&self, vault_id: &str) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let last = self.last_action.lock();
        match last.get(vault_id) {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Time left before the vault may act again, if it is on cooldown.
    pub fn remaining(&self, vault_id: &str) -> Option<Duration> {
        if self.cooldown.is_zero() {
            return None;
        }
        let last = self.last_action.lock();
        let at = last.get(vault_id)?;
        self.cooldown.checked_sub(at.elapsed()).filter(|d| !d.is_zero())
    }

    /// Stamps "now" for the vault unconditionally.
    pub fn record_action(&self, vault_id: &str) {
        self.last_action
            .lock()
            .insert(vault_id.to_string(), Instant::now());
    }

    /// Drops records older than twice the cooldown to bound memory. Run once
    /// per registry refresh.
    pub fn cleanup(&self) {
        if self.cooldown.is_zero() {
            self.last_action.lock().clear();
            return;
        }
        let horizon = self.cooldown * 2;
        self.last_action.lock().retain(|_, at| at.elapsed() < horizon);
    }

    pub fn tracked(&self) -> usize {
        self.last_action.lock().len()
    }
}
