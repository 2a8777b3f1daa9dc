//! Per-tenant token-bucket rate limiter.
//!
//! One bucket per tenant, created lazily on the tenant's first request. Each
//! bucket sits behind its own mutex inside a `DashMap`, so admissions for one
//! tenant serialize while different tenants never contend on a shared lock.
//!
//! Refill is continuous: `tokens_per_minute / 60` tokens per second, capped at
//! `tokens_per_minute`. A throttled check consumes nothing.
//!
//! When bound to a registry, budgets come from the current snapshot rather
//! than the caller's `Tenant`, which may predate a reload. Tenants that left
//! the snapshot or were disabled get `Revoked` and never regain a bucket.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::context::{RegistrySnapshot, Tenant, TenantRegistry};

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u64 },
    Throttled { remaining: u64, retry_after_secs: u64 },
    /// The tenant is no longer registered and enabled. Nothing was charged.
    Revoked,
}

impl Admission {
    pub fn remaining(self) -> u64 {
        match self {
            Admission::Admitted { remaining } | Admission::Throttled { remaining, .. } => {
                remaining
            }
            Admission::Revoked => 0,
        }
    }

    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(tokens_per_minute: u32, now: Instant) -> Self {
        let capacity = f64::from(tokens_per_minute.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last: now,
        }
    }

    /// Apply a new budget, keeping accrued tokens up to the new capacity.
    fn reconfigure(&mut self, tokens_per_minute: u32) {
        let capacity = f64::from(tokens_per_minute.max(1));
        if capacity == self.capacity {
            return;
        }
        self.capacity = capacity;
        self.refill_per_sec = capacity / 60.0;
        self.tokens = self.tokens.min(capacity);
    }

    fn refill(&mut self, now: Instant) {
        // Callers sample `now` before taking the lock, so it may trail `last`.
        if now <= self.last {
            return;
        }
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    fn remaining(&self) -> u64 {
        self.tokens.floor() as u64
    }

    fn try_take(&mut self, cost: u32, now: Instant) -> Admission {
        self.refill(now);
        let c = f64::from(cost);
        if self.tokens >= c {
            self.tokens -= c;
            return Admission::Admitted {
                remaining: self.remaining(),
            };
        }
        // deficit / (capacity / 60), kept exact for whole-token deficits.
        let deficit = c - self.tokens;
        let wait = (deficit * 60.0 / self.capacity).ceil().max(1.0);
        Admission::Throttled {
            remaining: self.remaining(),
            retry_after_secs: wait as u64,
        }
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    registry: Option<Arc<TenantRegistry>>,
}

impl RateLimiter {
    /// Limiter that trusts the `Tenant` each caller passes in.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter that takes budgets from `registry`'s current snapshot.
    pub fn with_registry(registry: Arc<TenantRegistry>) -> Self {
        Self {
            buckets: DashMap::new(),
            registry: Some(registry),
        }
    }

    /// Charge `requested` tokens to the tenant's bucket.
    pub fn admit(&self, tenant: &Tenant, requested: u32) -> Admission {
        self.admit_at(tenant, requested, Instant::now())
    }

    /// Same as [`RateLimiter::admit`] with an explicit clock reading.
    pub fn admit_at(&self, tenant: &Tenant, requested: u32, now: Instant) -> Admission {
        let Some(bucket) = self.bucket_for(tenant, now) else {
            return Admission::Revoked;
        };

        // Poisoned mutex means logic bug; deny instead of panicking.
        let Ok(mut g) = bucket.lock() else {
            tracing::error!(tenant = %tenant.id, "rate bucket lock poisoned; denying");
            return Admission::Throttled {
                remaining: 0,
                retry_after_secs: 1,
            };
        };
        // Read the budget under the bucket lock: `sync_with` takes the same
        // lock after swapping the snapshot, so a stale read is overwritten.
        let Some(tokens_per_minute) = self.live_budget(tenant) else {
            return Admission::Revoked;
        };
        g.reconfigure(tokens_per_minute);
        g.try_take(requested, now)
    }

    /// Tokens currently available to a tenant, without consuming any.
    /// `None` until the tenant's first admission check.
    pub fn remaining(&self, tenant_id: &str) -> Option<u64> {
        self.remaining_at(tenant_id, Instant::now())
    }

    pub fn remaining_at(&self, tenant_id: &str, now: Instant) -> Option<u64> {
        let bucket = self.buckets.get(tenant_id).map(|b| Arc::clone(b.value()))?;
        let mut g = bucket.lock().ok()?;
        g.refill(now);
        Some(g.remaining())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop buckets of tenants that left the registry or were disabled, and
    /// apply changed budgets to the rest.
    pub fn sync_with(&self, snapshot: &RegistrySnapshot) {
        self.buckets.retain(|id, bucket| match snapshot.get(id) {
            Some(t) if t.enabled => {
                if let Ok(mut g) = bucket.lock() {
                    g.reconfigure(t.tokens_per_minute);
                }
                true
            }
            _ => false,
        });
    }

    /// Budget the tenant has right now, or `None` once it is gone or disabled.
    fn live_budget(&self, tenant: &Tenant) -> Option<u32> {
        match &self.registry {
            None => Some(tenant.tokens_per_minute),
            Some(registry) => registry
                .snapshot()
                .get(&tenant.id)
                .filter(|t| t.enabled)
                .map(|t| t.tokens_per_minute),
        }
    }

    fn bucket_for(&self, tenant: &Tenant, now: Instant) -> Option<Arc<Mutex<TokenBucket>>> {
        if let Some(b) = self.buckets.get(&tenant.id) {
            return Some(Arc::clone(b.value()));
        }
        // The snapshot is checked while the shard is locked, so a concurrent
        // `sync_with` either sees this bucket and prunes it, or this check
        // already sees the new snapshot.
        match self.buckets.entry(tenant.id.clone()) {
            Entry::Occupied(e) => Some(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let tokens_per_minute = self.live_budget(tenant)?;
                tracing::debug!(tenant = %tenant.id, tpm = tokens_per_minute, "rate bucket created");
                let bucket = Arc::new(Mutex::new(TokenBucket::new(tokens_per_minute, now)));
                e.insert(Arc::clone(&bucket));
                Some(bucket)
            }
        }
    }
}
