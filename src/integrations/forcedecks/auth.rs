//! OAuth2 client-credentials tokens for the provider API.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::ProviderError;
use crate::storage::config::ProviderConfig;

/// Tokens are renewed this long before the provider says they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// A bearer token and its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Bearer value.
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable at `now`, leaving a safety margin before expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Client credentials
#[derive(Debug, Clone)]
struct Credentials {
    client_id: String,
    client_secret: String,
    scope: Option<String>,
}

/// Caches one access token and renews it on expiry or on demand.
pub struct TokenManager {
    http: reqwest::Client,
    auth_url: String,
    credentials: Credentials,
    cached: RwLock<Option<AccessToken>>,
}

impl TokenManager {
    /// Create a token manager. Fails when credentials are missing.
    pub fn new(http: reqwest::Client, config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("client_id is not set".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("client_secret is not set".to_string()))?;

        Ok(Self {
            http,
            auth_url: config.auth_url.clone(),
            credentials: Credentials {
                client_id,
                client_secret,
                scope: config.scope.clone(),
            },
            cached: RwLock::new(None),
        })
    }

    /// A fresh bearer token, fetching one only when the cache is stale.
    pub async fn token(&self) -> Result<String, ProviderError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.secret().to_string());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have renewed while we waited for the lock.
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.secret().to_string());
            }
        }

        let token = self.request_token().await?;
        let secret = token.secret().to_string();
        *cached = Some(token);
        Ok(secret)
    }

    /// Drop the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn request_token(&self) -> Result<AccessToken, ProviderError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        if let Some(scope) = self.credentials.scope.as_deref() {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(&self.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("token request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ProviderError::Transient(format!(
                "token endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("token response read failed: {}", e)))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("token response: {}", e)))?;

        tracing::debug!("Obtained provider token valid for {}s", parsed.expires_in);

        Ok(AccessToken::new(
            parsed.access_token,
            Utc::now() + Duration::seconds(parsed.expires_in.max(0)),
        ))
    }
}
