//! Strategy resolution.
//!
//! Maps a vault owner to a named threshold profile. Resolution is total:
//! lookup failures, unknown strategy names and non-monotonic profiles all
//! degrade to the system default, logged at warning level. Resolved
//! profiles are cached with a TTL so a flapping source cannot add a lookup
//! per vault per cycle.

use crate::models::ThresholdProfile;
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Optional dynamic profile source (on-chain registry, config service).
#[async_trait::async_trait]
pub trait StrategySource: Send + Sync {
    async fn fetch_profile(&self, owner: &str) -> Result<Option<ThresholdProfile>>;
}

/// Built-in named presets, selectable per owner via
/// VAULTGUARD_OWNER_STRATEGIES ("owner:name,owner:name").
pub fn preset(name: &str) -> Option<ThresholdProfile> {
    match name.trim().to_ascii_lowercase().as_str() {
        "conservative" => Some(ThresholdProfile {
            warning_bps: 5000,
            rebalance_bps: 5500,
            max_borrow_bps: 6000,
            liquidation_bps: 7000,
        }),
        "balanced" => Some(ThresholdProfile::default()),
        "aggressive" => Some(ThresholdProfile {
            warning_bps: 6500,
            rebalance_bps: 7000,
            max_borrow_bps: 7500,
            liquidation_bps: 8500,
        }),
        _ => None,
    }
}

struct CacheEntry {
    profile: ThresholdProfile,
    fetched_at: Instant,
}

pub struct StrategyResolver {
    default_profile: ThresholdProfile,
    assignments: HashMap<String, ThresholdProfile>,
    source: Option<Arc<dyn StrategySource>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl StrategyResolver {
    pub fn new(default_profile: ThresholdProfile, ttl: Duration) -> Self {
        Self {
            default_profile,
            assignments: HashMap::new(),
            source: None,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Parses static owner assignments of the form "owner:name,owner:name".
    pub fn with_assignments(mut self, spec: &str) -> Self {
        for pair in spec.split(',') {
            let Some((owner, name)) = pair.split_once(':') else {
                continue;
            };
            let owner = owner.trim();
            if owner.is_empty() {
                continue;
            }
            match preset(name) {
                Some(p) => {
                    self.assignments.insert(owner.to_string(), p);
                }
                None => warn!(owner, strategy = name.trim(), "unknown strategy preset, ignoring"),
            }
        }
        self
    }

    pub fn with_source(mut self, source: Arc<dyn StrategySource>) -> Self {
        self.source = Some(source);
        self
    }

    fn static_profile(&self, owner: &str) -> ThresholdProfile {
        self.assignments
            .get(owner)
            .copied()
            .unwrap_or(self.default_profile)
    }

    /// Resolves the threshold profile for an owner. Never fails.
    pub async fn resolve_profile(&self, owner: &str) -> ThresholdProfile {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(owner) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return entry.profile;
                }
            }
        }

        let profile = match &self.source {
            Some(source) => match source.fetch_profile(owner).await {
                Ok(Some(p)) if p.is_monotonic() => p,
                Ok(Some(p)) => {
                    warn!(owner, ?p, "non-monotonic profile from source, using static");
                    self.static_profile(owner)
                }
                Ok(None) => self.static_profile(owner),
                Err(e) => {
                    warn!(owner, error = %e, "strategy source lookup failed, using static");
                    self.static_profile(owner)
                }
            },
            None => self.static_profile(owner),
        };

        debug!(owner, ?profile, "resolved threshold profile");
        self.cache.write().insert(
            owner.to_string(),
            CacheEntry {
                profile,
                fetched_at: Instant::now(),
            },
        );
        profile
    }
}
