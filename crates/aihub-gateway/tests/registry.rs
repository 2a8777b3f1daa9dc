#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};

use aihub_core::error::ErrorCode;
use aihub_core::route::BackendCategory;
use aihub_gateway::config;
use aihub_gateway::context::TenantRegistry;

use common::tenant_config;

#[test]
fn resolves_known_and_rejects_unknown() {
    let registry = TenantRegistry::new(&[tenant_config("acme", 100)]).unwrap();

    let t = registry.resolve("acme").unwrap();
    assert_eq!(t.id, "acme");
    assert_eq!(t.display_name, "acme");
    assert_eq!(t.tokens_per_minute, 100);
    assert!(t.backend_enabled(BackendCategory::OpenAI));
    assert!(!t.backend_enabled(BackendCategory::Unmatched));

    let err = registry.resolve("Acme").unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownTenant);
}

#[test]
fn reload_swaps_whole_generation() {
    let registry = TenantRegistry::new(&[tenant_config("a", 100)]).unwrap();
    let held = registry.resolve("a").unwrap();
    assert_eq!(registry.snapshot().generation(), 1);

    let next = registry
        .reload(&[tenant_config("a", 5), tenant_config("b", 7)])
        .unwrap();
    assert_eq!(next.generation(), 2);
    assert_eq!(next.len(), 2);

    // Requests already holding a tenant keep the old view.
    assert_eq!(held.tokens_per_minute, 100);
    assert_eq!(registry.resolve("a").unwrap().tokens_per_minute, 5);
    assert!(registry.resolve("b").is_ok());
}

#[test]
fn failed_reload_keeps_current_generation() {
    let registry = TenantRegistry::new(&[tenant_config("a", 100)]).unwrap();

    let err = registry
        .reload(&[tenant_config("x", 10), tenant_config("x", 20)])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    let err = registry.reload(&[tenant_config("zero", 0)]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    assert_eq!(registry.snapshot().generation(), 1);
    assert!(registry.resolve("a").is_ok());
    assert!(registry.resolve("x").is_err());
}

#[test]
fn readers_never_see_a_mixed_tenant_set() {
    let gen_a = [tenant_config("a1", 10), tenant_config("a2", 10)];
    let gen_b = [tenant_config("b1", 10), tenant_config("b2", 10)];
    let registry = TenantRegistry::new(&gen_a).unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    let snap = registry.snapshot();
                    let a = snap.contains("a1") && snap.contains("a2");
                    let b = snap.contains("b1") && snap.contains("b2");
                    assert_eq!(snap.len(), 2);
                    assert!(a ^ b, "mixed generation {}", snap.generation());
                }
            });
        }
        for i in 0..200 {
            let next = if i % 2 == 0 { &gen_b } else { &gen_a };
            registry.reload(next).unwrap();
        }
        done.store(true, Ordering::Relaxed);
    });

    assert_eq!(registry.snapshot().generation(), 201);
}

#[test]
fn app_state_reload_applies_tenants_and_counts() {
    let backend = std::sync::Arc::new(common::FakeBackend::ok());
    let state = common::default_state(backend);

    let next = config::load_from_str(
        r#"
version: 1
tenants:
  - id: "newcomer"
    rate_limit: { tokens_per_minute: 3 }
"#,
    )
    .unwrap();
    state.reload(&next).unwrap();

    assert!(state.registry().resolve("newcomer").is_ok());
    assert!(state.registry().resolve(common::WLRS).is_err());
    assert_eq!(state.metrics().config_reloads.get(&[("result", "ok")]), 1);
}

#[test]
fn reload_rejects_tenants_below_request_cost() {
    let registry = TenantRegistry::with_request_cost(&[tenant_config("a", 100)], 10).unwrap();

    let err = registry
        .reload(&[tenant_config("a", 100), tenant_config("small", 9)])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    assert_eq!(registry.snapshot().generation(), 1);

    assert!(TenantRegistry::with_request_cost(&[tenant_config("small", 9)], 10).is_err());
    registry.reload(&[tenant_config("small", 10)]).unwrap();
}
