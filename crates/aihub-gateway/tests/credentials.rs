#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use aihub_core::error::ErrorCode;
use aihub_core::route::{BackendCategory, COGNITIVE_SERVICES_AUDIENCE};
use aihub_gateway::auth::{
    AccessToken, AuthRewriter, Credential, CredentialCache, ManagedIdentitySource,
    StaticTokenSource, TokenSource,
};

use common::{tenant, CountingTokenSource, FlakyTokenSource};

const SKEW: Duration = Duration::from_secs(300);

#[test]
fn freshness_honours_skew() {
    let now = Instant::now();
    let tok = AccessToken::new("t", now + Duration::from_secs(600));
    assert!(tok.is_fresh(SKEW, now));
    assert!(!tok.is_fresh(SKEW, now + Duration::from_secs(300)));
    assert!(tok.is_fresh(Duration::ZERO, now + Duration::from_secs(599)));
}

#[tokio::test]
async fn concurrent_misses_share_one_fetch() {
    let source = Arc::new(CountingTokenSource::with(
        Duration::from_millis(50),
        Duration::from_secs(3600),
    ));
    let cache = Arc::new(CredentialCache::new(source.clone(), SKEW));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(COGNITIVE_SERVICES_AUDIENCE).await })
        })
        .collect();
    for t in tasks {
        let tok = t.await.unwrap().unwrap();
        assert_eq!(tok.expose(), "tok-1");
    }

    assert_eq!(source.count(), 1);
    assert_eq!(cache.refresh_count(), 1);
}

#[tokio::test]
async fn token_inside_skew_window_is_refreshed() {
    let source = Arc::new(CountingTokenSource::with(Duration::ZERO, Duration::from_secs(10)));
    let cache = CredentialCache::new(source.clone(), SKEW);

    assert_eq!(cache.get(COGNITIVE_SERVICES_AUDIENCE).await.unwrap().expose(), "tok-1");
    assert_eq!(cache.get(COGNITIVE_SERVICES_AUDIENCE).await.unwrap().expose(), "tok-2");
    assert_eq!(source.count(), 2);
}

#[tokio::test]
async fn failed_refresh_serves_unexpired_token() {
    let source = Arc::new(FlakyTokenSource::new(1, Duration::from_secs(100)));
    let cache = CredentialCache::new(source, SKEW);

    let first = cache.get(COGNITIVE_SERVICES_AUDIENCE).await.unwrap();
    let second = cache.get(COGNITIVE_SERVICES_AUDIENCE).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.failure_count(), 1);
}

#[tokio::test]
async fn failure_without_cached_token_is_credential_unavailable() {
    let cache = CredentialCache::new(Arc::new(FlakyTokenSource::failing()), SKEW);

    let err = cache.get(COGNITIVE_SERVICES_AUDIENCE).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CredentialUnavailable);
    assert!(!err.public_message().contains("169.254"));
    assert_eq!(cache.failure_count(), 1);
    assert_eq!(cache.refresh_count(), 0);
}

#[tokio::test]
async fn rewriter_replaces_inbound_credentials() {
    let cache = CredentialCache::new(Arc::new(StaticTokenSource::new("static-abc")), SKEW);
    let rewriter = AuthRewriter::new(cache);
    let t = tenant(common::WLRS, 1000);

    let cred = rewriter
        .rewrite(BackendCategory::DocumentIntelligence, &t)
        .await
        .unwrap();
    assert_eq!(cred.audience(), COGNITIVE_SERVICES_AUDIENCE);

    let mut headers = HeaderMap::new();
    headers.insert("api-key", "caller-key".parse().unwrap());
    headers.insert(header::AUTHORIZATION, "Basic Zm9vOmJhcg==".parse().unwrap());
    headers.insert("x-tenant-id", "someone-else".parse().unwrap());
    headers.insert(header::ACCEPT, "application/json".parse().unwrap());

    rewriter.apply(&mut headers, &cred, &t).unwrap();

    assert!(headers.get("api-key").is_none());
    let auth = headers.get(header::AUTHORIZATION).unwrap();
    assert_eq!(auth, "Bearer static-abc");
    assert!(auth.is_sensitive());
    assert_eq!(headers.get_all("x-tenant-id").iter().count(), 1);
    assert_eq!(headers.get("x-tenant-id").unwrap(), common::WLRS);
    assert_eq!(headers.get(header::ACCEPT).unwrap(), "application/json");
}

#[tokio::test]
async fn unmatched_category_has_no_credential() {
    let cache = CredentialCache::new(Arc::new(StaticTokenSource::new("x")), SKEW);
    let rewriter = AuthRewriter::new(cache);
    let err = rewriter
        .rewrite(BackendCategory::Unmatched, &tenant("acme", 10))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Internal);
}

#[test]
fn bearer_header_rejects_unprintable_tokens() {
    let tok = Arc::new(AccessToken::new("bad\ntoken", Instant::now()));
    let err = Credential::new(tok, COGNITIVE_SERVICES_AUDIENCE)
        .bearer_header()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CredentialUnavailable);
}

async fn imds_token(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    let ok = headers.get("metadata").is_some_and(|v| v == "true")
        && q.get("api-version").map(String::as_str) == Some("2018-02-01")
        && q.get("resource").map(String::as_str) == Some(COGNITIVE_SERVICES_AUDIENCE)
        && q.get("client_id").map(String::as_str) == Some("uami-123");
    if !ok {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json(serde_json::json!({
        "access_token": "msi-imds",
        "expires_in": "3599",
        "token_type": "Bearer",
        "resource": COGNITIVE_SERVICES_AUDIENCE,
    }))
    .into_response()
}

async fn app_service_token(headers: HeaderMap, Query(q): Query<HashMap<String, String>>) -> Response {
    let ok = headers.get("x-identity-header").is_some_and(|v| v == "secret-hdr")
        && q.get("api-version").map(String::as_str) == Some("2019-08-01")
        && q.get("resource").map(String::as_str) == Some(COGNITIVE_SERVICES_AUDIENCE)
        && !q.contains_key("client_id");
    if !ok {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let expires_on = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        + 1800;
    Json(serde_json::json!({
        "access_token": "msi-app-service",
        "expires_on": expires_on,
    }))
    .into_response()
}

#[tokio::test]
async fn managed_identity_via_imds() {
    let addr = common::serve(Router::new().route("/token", get(imds_token))).await;
    let source =
        ManagedIdentitySource::imds(format!("http://{addr}/token"), Some("uami-123".into()))
            .unwrap();
    assert_eq!(source.name(), "managed_identity_imds");

    let before = Instant::now();
    let tok = source.fetch(COGNITIVE_SERVICES_AUDIENCE).await.unwrap();
    assert_eq!(tok.expose(), "msi-imds");
    assert!(tok.expires_at() >= before + Duration::from_secs(3599));
}

#[tokio::test]
async fn managed_identity_via_app_service_endpoint() {
    let addr = common::serve(Router::new().route("/msi", get(app_service_token))).await;
    let source =
        ManagedIdentitySource::app_service(format!("http://{addr}/msi"), "secret-hdr", None)
            .unwrap();

    let tok = source.fetch(COGNITIVE_SERVICES_AUDIENCE).await.unwrap();
    assert_eq!(tok.expose(), "msi-app-service");
    assert!(tok.is_fresh(Duration::from_secs(1700), Instant::now()));
    assert!(!tok.is_fresh(Duration::from_secs(1900), Instant::now()));
}

#[tokio::test]
async fn identity_endpoint_errors_are_credential_unavailable() {
    let addr = common::serve(Router::new().route("/token", get(imds_token))).await;
    // Wrong client id is answered with 400.
    let source =
        ManagedIdentitySource::imds(format!("http://{addr}/token"), Some("other".into())).unwrap();
    let err = source.fetch(COGNITIVE_SERVICES_AUDIENCE).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CredentialUnavailable);

    let nowhere = ManagedIdentitySource::imds(format!("http://{addr}/missing"), None).unwrap();
    let err = nowhere.fetch(COGNITIVE_SERVICES_AUDIENCE).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CredentialUnavailable);
}

async fn endless_token() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "access_token": "msi-endless",
        "expires_in": u64::MAX.to_string(),
    }))
}

#[tokio::test]
async fn absurd_expiry_is_clamped() {
    let addr = common::serve(Router::new().route("/token", get(endless_token))).await;
    let source = ManagedIdentitySource::imds(format!("http://{addr}/token"), None).unwrap();

    let tok = source.fetch(COGNITIVE_SERVICES_AUDIENCE).await.unwrap();
    assert_eq!(tok.expose(), "msi-endless");
    assert!(tok.expires_at() <= Instant::now() + Duration::from_secs(24 * 3600));
    assert!(tok.is_fresh(SKEW, Instant::now()));
}

#[test]
fn oversized_skew_is_never_fresh() {
    let tok = AccessToken::new("t", Instant::now() + Duration::from_secs(60));
    assert!(!tok.is_fresh(Duration::MAX, Instant::now()));
}
