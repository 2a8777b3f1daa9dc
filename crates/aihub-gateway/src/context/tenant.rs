use std::collections::HashSet;

use aihub_core::route::BackendCategory;

use crate::config::{TenantConfig, TenantPolicy};

/// Resolved tenant, immutable once built.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Stable tenant identifier.
    pub id: String,
    /// Human-readable name (defaults to the id).
    pub display_name: String,
    pub enabled: bool,
    backends: HashSet<BackendCategory>,
    /// Bucket capacity; refills at `tokens_per_minute / 60` per second.
    pub tokens_per_minute: u32,
    pub policy: TenantPolicy,
}

impl Tenant {
    pub fn from_config(cfg: &TenantConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            display_name: cfg.display_name.clone().unwrap_or_else(|| cfg.id.clone()),
            enabled: cfg.enabled,
            backends: cfg.backends.iter().copied().collect(),
            tokens_per_minute: cfg.rate_limit.tokens_per_minute,
            policy: cfg.policy,
        }
    }

    pub fn backend_enabled(&self, category: BackendCategory) -> bool {
        self.backends.contains(&category)
    }

    pub fn backends(&self) -> impl Iterator<Item = BackendCategory> + '_ {
        self.backends.iter().copied()
    }
}
