// src/services/credentials.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing;

use crate::config::Secret;
use crate::errors::DispatchError as AppError;
use crate::utils::clock::Clock;

// Tokens are re-fetched once less than this much life is left
pub const REFRESH_MARGIN_SECS: i64 = 60;
// Lifetime assumed when the issuer does not say
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 14 * 60;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential provider is not configured: {0}")]
    NotConfigured(String),

    #[error("token request failed: {0}")]
    Request(String),

    #[error("token issuer rejected the client (status {0})")]
    Rejected(u16),

    #[error("token response had no access_token")]
    MalformedResponse,
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::CredentialsUnavailable(err.to_string())
    }
}

/// Service-to-service bearer tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, CredentialError>;

    /// Drop any cached token, e.g. after a downstream 401/403.
    async fn invalidate(&self);
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Client-credentials token from the user service, cached until it is close to expiry.
pub struct CachedTokenProvider {
    token_url: String,
    client_id: String,
    client_secret: Secret<String>,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedToken>>,
}

impl CachedTokenProvider {
    pub fn new(
        user_service_url: &str,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        timeout: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            token_url: format!("{}/auth/token", user_service_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret,
            client,
            clock,
            cached: Mutex::new(None),
        })
    }

    fn is_fresh(token: &CachedToken, now: DateTime<Utc>) -> bool {
        token.expires_at > now + Duration::seconds(REFRESH_MARGIN_SECS)
    }

    async fn fetch(&self) -> Result<CachedToken, CredentialError> {
        tracing::info!("Requesting service token from {} for client {}", self.token_url, self.client_id);

        let form = [
            ("username", self.client_id.as_str()),
            ("password", self.client_secret.reveal().as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CredentialError::Rejected(response.status().as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Request(e.to_string()))?;
        let value = body.access_token.ok_or(CredentialError::MalformedResponse)?;
        let lifetime = body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(CachedToken {
            value,
            expires_at: self.clock.now() + Duration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl CredentialProvider for CachedTokenProvider {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        // Holding the lock across the fetch keeps concurrent callers to one request
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Self::is_fresh(token, self.clock.now()) {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            tracing::warn!("Service token invalidated");
        }
    }
}

/// Fixed token, for local runs and tests.
pub struct StaticCredentialProvider {
    token: Option<String>,
}

impl StaticCredentialProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }

    pub fn unconfigured() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        self.token
            .clone()
            .ok_or_else(|| CredentialError::NotConfigured("no service client credentials".to_string()))
    }

    async fn invalidate(&self) {}
}
