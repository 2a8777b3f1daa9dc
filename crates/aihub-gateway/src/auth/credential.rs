//! Bearer tokens and the per-audience token cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use axum::http::HeaderValue;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use aihub_core::error::{GatewayError, Result};

use super::source::TokenSource;

/// A bearer token and the instant it stops being valid.
#[derive(Debug)]
pub struct AccessToken {
    secret: SecretString,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            expires_at,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Usable for at least `skew` more.
    pub fn is_fresh(&self, skew: Duration, now: Instant) -> bool {
        now.checked_add(skew).is_some_and(|t| t < self.expires_at)
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

/// Credential resolved for one request.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Arc<AccessToken>,
    audience: &'static str,
}

impl Credential {
    pub fn new(token: Arc<AccessToken>, audience: &'static str) -> Self {
        Self { token, audience }
    }

    pub fn audience(&self) -> &'static str {
        self.audience
    }

    /// `Authorization` header value, flagged sensitive so it stays out of logs.
    pub fn bearer_header(&self) -> Result<HeaderValue> {
        let mut v = HeaderValue::from_str(&format!("Bearer {}", self.token.expose()))
            .map_err(|_| {
                GatewayError::CredentialUnavailable("token is not a valid header value".into())
            })?;
        v.set_sensitive(true);
        Ok(v)
    }
}

#[derive(Default)]
struct AudienceSlot {
    current: ArcSwapOption<AccessToken>,
    refresh: Mutex<()>,
}

impl AudienceSlot {
    fn fresh(&self, skew: Duration) -> Option<Arc<AccessToken>> {
        self.current
            .load_full()
            .filter(|t| t.is_fresh(skew, Instant::now()))
    }
}

/// Shares tokens read-only across requests.
///
/// A token is refreshed once it is within `skew` of expiry. Refresh for an
/// audience runs under that audience's async mutex with a re-check after
/// acquiring it, so a burst of requests causes one fetch.
pub struct CredentialCache {
    source: Arc<dyn TokenSource>,
    skew: Duration,
    slots: DashMap<&'static str, Arc<AudienceSlot>>,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn TokenSource>, skew: Duration) -> Self {
        Self {
            source,
            skew,
            slots: DashMap::new(),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Successful fetches from the token source.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn get(&self, audience: &'static str) -> Result<Arc<AccessToken>> {
        let slot = self.slot(audience);
        if let Some(tok) = slot.fresh(self.skew) {
            return Ok(tok);
        }

        let _guard = slot.refresh.lock().await;
        if let Some(tok) = slot.fresh(self.skew) {
            return Ok(tok);
        }

        match self.source.fetch(audience).await {
            Ok(tok) => {
                let tok = Arc::new(tok);
                slot.current.store(Some(Arc::clone(&tok)));
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(audience, source = self.source.name(), "credential refreshed");
                Ok(tok)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                // Inside the skew window the old token still works.
                if let Some(tok) = slot
                    .current
                    .load_full()
                    .filter(|t| t.is_fresh(Duration::ZERO, Instant::now()))
                {
                    tracing::warn!(audience, error = %e, "credential refresh failed; serving cached token");
                    return Ok(tok);
                }
                tracing::warn!(audience, error = %e, "credential acquisition failed");
                Err(match e {
                    GatewayError::CredentialUnavailable(_) => e,
                    other => GatewayError::CredentialUnavailable(other.to_string()),
                })
            }
        }
    }

    fn slot(&self, audience: &'static str) -> Arc<AudienceSlot> {
        if let Some(s) = self.slots.get(audience) {
            return Arc::clone(s.value());
        }
        Arc::clone(self.slots.entry(audience).or_default().value())
    }
}
