//! Token sources: managed identity (production) and a static bearer (local dev).

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use aihub_core::error::{GatewayError, Result};

use super::credential::AccessToken;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const STATIC_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);
/// Fetched lifetimes are clamped to this.
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Something that can mint a bearer token for an audience.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, audience: &str) -> Result<AccessToken>;
}

enum MsiEndpoint {
    /// Container Apps / App Service identity endpoint.
    AppService { url: String, header: SecretString },
    /// Azure Instance Metadata Service.
    Imds { url: String },
}

/// Managed-identity token source.
pub struct ManagedIdentitySource {
    client: reqwest::Client,
    endpoint: MsiEndpoint,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
}

impl ManagedIdentitySource {
    /// Pick the identity endpoint the hosting platform exposes:
    /// `IDENTITY_ENDPOINT` + `IDENTITY_HEADER` when set, IMDS otherwise.
    pub fn from_env(client_id: Option<String>) -> Result<Self> {
        match (
            std::env::var("IDENTITY_ENDPOINT"),
            std::env::var("IDENTITY_HEADER"),
        ) {
            (Ok(url), Ok(header)) => Self::app_service(url, header, client_id),
            _ => Self::imds(IMDS_TOKEN_URL, client_id),
        }
    }

    pub fn imds(url: impl Into<String>, client_id: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: MsiEndpoint::Imds { url: url.into() },
            client_id,
        })
    }

    pub fn app_service(
        url: impl Into<String>,
        header: impl Into<String>,
        client_id: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoint: MsiEndpoint::AppService {
                url: url.into(),
                header: SecretString::from(header.into()),
            },
            client_id,
        })
    }

    fn request(&self, audience: &str) -> reqwest::RequestBuilder {
        let (req, api_version) = match &self.endpoint {
            MsiEndpoint::AppService { url, header } => (
                self.client
                    .get(url)
                    .header("X-IDENTITY-HEADER", header.expose_secret()),
                APP_SERVICE_API_VERSION,
            ),
            MsiEndpoint::Imds { url } => (
                self.client.get(url).header("Metadata", "true"),
                IMDS_API_VERSION,
            ),
        };
        let mut query = vec![("api-version", api_version), ("resource", audience)];
        if let Some(id) = &self.client_id {
            query.push(("client_id", id.as_str()));
        }
        req.query(&query)
    }
}

#[async_trait]
impl TokenSource for ManagedIdentitySource {
    fn name(&self) -> &'static str {
        match self.endpoint {
            MsiEndpoint::AppService { .. } => "managed_identity_app_service",
            MsiEndpoint::Imds { .. } => "managed_identity_imds",
        }
    }

    async fn fetch(&self, audience: &str) -> Result<AccessToken> {
        let resp = self
            .request(audience)
            .send()
            .await
            .map_err(|e| GatewayError::CredentialUnavailable(format!("identity endpoint: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::CredentialUnavailable(format!(
                "identity endpoint returned {status}"
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::CredentialUnavailable(format!("token response: {e}")))?;
        let lifetime = token_lifetime(&body)?.min(MAX_TOKEN_LIFETIME);
        Ok(AccessToken::new(body.access_token, Instant::now() + lifetime))
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| GatewayError::Internal(format!("identity http client: {e}")))
}

/// Identity endpoints send numbers as JSON strings or numbers depending on
/// api-version.
fn as_secs(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn token_lifetime(body: &TokenResponse) -> Result<Duration> {
    if let Some(secs) = body.expires_in.as_ref().and_then(as_secs) {
        return Ok(Duration::from_secs(secs));
    }
    if let Some(epoch) = body.expires_on.as_ref().and_then(as_secs) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        return Ok(Duration::from_secs(epoch.saturating_sub(now)));
    }
    Err(GatewayError::CredentialUnavailable(
        "token response carries no expiry".into(),
    ))
}

/// Fixed bearer value, for local runs against backends that accept it.
pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| GatewayError::BadRequest(format!("env var {var} is not set")))?;
        if token.trim().is_empty() {
            return Err(GatewayError::BadRequest(format!("env var {var} is empty")));
        }
        Ok(Self::new(token))
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, _audience: &str) -> Result<AccessToken> {
        Ok(AccessToken::new(
            self.token.expose_secret(),
            Instant::now() + STATIC_TOKEN_LIFETIME,
        ))
    }
}
