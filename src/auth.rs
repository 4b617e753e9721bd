//! Client-credential authentication against the identity provider.
//!
//! [`CredentialProvider`] owns the token cache. A cached [`Token`] is reused
//! until it is within [`EXPIRY_MARGIN_SECS`] of expiry; after that the next
//! [`get_token`](CredentialProvider::get_token) call performs one fresh
//! exchange. The cache sits behind an async mutex so concurrent callers
//! trigger at most one exchange.
//!
//! The exchange itself is behind the [`TokenExchange`] trait and expiry is
//! measured against a [`Clock`], so refresh behavior can be tested without a
//! network or real time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{Config, Secret};
use crate::error::AuthError;

/// Tokens this close to expiry are treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A bearer token and its expiry. Never written to disk.
#[derive(Debug, Clone)]
pub struct Token {
    access_token: Secret,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(access_token: Secret, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }

    pub fn bearer(&self) -> &str {
        self.access_token.expose()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Result of one successful exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret,
    /// Lifetime in seconds from the moment of issue.
    pub expires_in: i64,
}

/// One client-credential round trip with the identity provider.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self) -> Result<TokenGrant, AuthError>;
}

/// Produces bearer tokens on demand, caching until near expiry.
pub struct CredentialProvider {
    exchange: Box<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<Token>>,
}

impl CredentialProvider {
    pub fn new(exchange: Box<dyn TokenExchange>, clock: Arc<dyn Clock>) -> Self {
        Self {
            exchange,
            clock,
            cached: Mutex::new(None),
        }
    }

    /// Provider backed by the real token endpoint and the system clock.
    pub fn from_config(config: &Config) -> Result<Self> {
        let exchange = ClientCredentialExchange::from_config(config)?;
        Ok(Self::new(Box::new(exchange), Arc::new(SystemClock)))
    }

    /// Return the cached token if still valid, otherwise exchange for a new one.
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();
        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(now) {
                return Ok(token.clone());
            }
            debug!(expired_at = %token.expires_at, "cached token expired, refreshing");
        }

        let grant = self.exchange.exchange().await?;
        let token = Token::new(grant.access_token, now + Duration::seconds(grant.expires_in));
        debug!(expires_at = %token.expires_at, "acquired application token");
        *cached = Some(token.clone());
        Ok(token)
    }
}

// ============ Token endpoint ============

/// `POST {authority}/{tenant}/oauth2/v2.0/token` with
/// `grant_type=client_credentials`.
pub struct ClientCredentialExchange {
    client: reqwest::Client,
    token_url: String,
    tenant_id: String,
    client_id: String,
    client_secret: Secret,
    scope: String,
}

impl ClientCredentialExchange {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.graph.timeout_secs))
            .build()?;
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.graph.authority_host.trim_end_matches('/'),
            config.tenant_id
        );
        Ok(Self {
            client,
            token_url,
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.graph.scope.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3599
}

/// Error body of the token endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct TokenErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
    #[serde(default)]
    pub error_codes: Vec<u64>,
}

#[async_trait]
impl TokenExchange for ClientCredentialExchange {
    async fn exchange(&self) -> Result<TokenGrant, AuthError> {
        debug!(
            url = %self.token_url,
            client_id = %self.client_id,
            "requesting client-credential token"
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("scope", self.scope.as_str()),
        ];

        let resp = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::TenantUnreachable {
                tenant: self.tenant_id.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            let body: TokenResponse =
                resp.json()
                    .await
                    .map_err(|e| AuthError::InvalidCredentials {
                        message: format!("malformed token response: {}", e),
                    })?;
            return Ok(TokenGrant {
                access_token: Secret::new(body.access_token),
                expires_in: body.expires_in,
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let body: TokenErrorBody = serde_json::from_str(&text).unwrap_or_default();
        Err(classify_rejection(&self.tenant_id, status.as_u16(), &body))
    }
}

/// Map a token endpoint rejection onto the [`AuthError`] taxonomy.
pub fn classify_rejection(tenant: &str, status: u16, body: &TokenErrorBody) -> AuthError {
    let message = if body.error_description.is_empty() {
        format!("token endpoint returned HTTP {} {}", status, body.error)
    } else {
        // Descriptions carry trace ids on following lines.
        body.error_description
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    };
    let has_code = |code: u64| body.error_codes.contains(&code);

    if has_code(90002) || has_code(900023) || body.error == "invalid_tenant" {
        return AuthError::TenantUnreachable {
            tenant: tenant.to_string(),
            message,
        };
    }
    if has_code(65001)
        || has_code(500011)
        || body.error == "consent_required"
        || body.error == "invalid_scope"
    {
        return AuthError::ConsentMissing { message };
    }
    AuthError::InvalidCredentials { message }
}
