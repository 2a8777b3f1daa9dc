//! Tenant registry with atomic snapshot replacement.
//!
//! Readers load the current snapshot lock-free; `reload` builds and validates a
//! complete replacement before swapping it in, so no request ever observes a
//! mix of old and new tenant sets.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use aihub_core::error::{GatewayError, Result};

use crate::config::{schema::validate_tenants, TenantConfig};

use super::tenant::Tenant;

/// Read-only view of one registry generation.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    tenants: HashMap<String, Arc<Tenant>>,
    generation: u64,
}

impl RegistrySnapshot {
    pub fn get(&self, tenant_id: &str) -> Option<&Arc<Tenant>> {
        self.tenants.get(tenant_id)
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.tenants.contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tenant>> {
        self.tenants.values()
    }
}

pub struct TenantRegistry {
    current: ArcSwap<RegistrySnapshot>,
    /// Tokens one request costs; every enabled tenant must afford it.
    request_cost: u32,
}

impl TenantRegistry {
    /// Registry for a one-token request cost.
    pub fn new(tenants: &[TenantConfig]) -> Result<Self> {
        Self::with_request_cost(tenants, 1)
    }

    pub fn with_request_cost(tenants: &[TenantConfig], request_cost: u32) -> Result<Self> {
        let snapshot = build_snapshot(tenants, request_cost, 1)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            request_cost,
        })
    }

    /// Look up a tenant in the current generation.
    pub fn resolve(&self, tenant_id: &str) -> Result<Arc<Tenant>> {
        self.current
            .load()
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownTenant(tenant_id.to_string()))
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Replace the whole tenant set. On error the current generation stays.
    pub fn reload(&self, tenants: &[TenantConfig]) -> Result<Arc<RegistrySnapshot>> {
        let next_gen = self.current.load().generation + 1;
        let next = Arc::new(build_snapshot(tenants, self.request_cost, next_gen)?);
        self.current.store(Arc::clone(&next));
        tracing::info!(generation = next_gen, tenants = next.len(), "tenant registry reloaded");
        Ok(next)
    }
}

fn build_snapshot(
    tenants: &[TenantConfig],
    request_cost: u32,
    generation: u64,
) -> Result<RegistrySnapshot> {
    validate_tenants(tenants, request_cost)?;
    let tenants = tenants
        .iter()
        .map(|t| (t.id.clone(), Arc::new(Tenant::from_config(t))))
        .collect();
    Ok(RegistrySnapshot { tenants, generation })
}
