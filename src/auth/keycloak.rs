//! Keycloak (OpenID Connect password grant) token provider with caching

use super::{Credential, DEFAULT_TOKEN_LIFETIME, TokenProvider, http_client};
use crate::config::KeycloakConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const OPEN_ID_SCOPE: &str = "openid";

/// Subset of the token endpoint response we rely on
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

enum CacheState {
    Empty,
    Cached(Credential),
    Closed,
}

/// Token provider backed by a Keycloak token endpoint
///
/// The issued `id_token` is cached and handed out until it is within
/// [`EXPIRY_SAFETY_MARGIN`](super::EXPIRY_SAFETY_MARGIN) of expiring. The
/// freshness check and the refresh run under a single lock, so concurrent
/// callers wait for one fetch instead of issuing their own.
pub struct KeycloakTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    grant_type: String,
    username: String,
    password: String,
    state: Mutex<CacheState>,
}

impl KeycloakTokenProvider {
    /// Create a provider for the given token endpoint
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        grant_type: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            grant_type: grant_type.into(),
            username: username.into(),
            password: password.into(),
            state: Mutex::new(CacheState::Empty),
        })
    }

    /// Create a provider from configuration
    pub fn from_config(config: &KeycloakConfig) -> Result<Self, AuthError> {
        Self::new(
            &config.url,
            &config.client_id,
            &config.grant_type,
            &config.username,
            &config.password,
        )
    }

    fn form_body(&self) -> String {
        [
            ("grant_type", self.grant_type.as_str()),
            ("client_id", self.client_id.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("scope", OPEN_ID_SCOPE),
        ]
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
    }

    async fn fetch(&self) -> Result<Credential, AuthError> {
        tracing::debug!(endpoint = %self.endpoint, "requesting token from keycloak");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(self.form_body())
            .send()
            .await
            .map_err(AuthError::Http)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "keycloak rejected token request");
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(AuthError::Http)?;
        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let token = parsed.id_token.ok_or(AuthError::MissingIdToken)?;
        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        tracing::debug!(expires_in = lifetime.as_secs(), "keycloak token issued");
        Ok(Credential::new(token, lifetime))
    }
}

#[async_trait]
impl TokenProvider for KeycloakTokenProvider {
    async fn token(&self) -> Result<Credential, AuthError> {
        let mut state = self.state.lock().await;
        match &*state {
            CacheState::Closed => return Err(AuthError::Closed),
            CacheState::Cached(credential) if credential.is_fresh_at(Instant::now()) => {
                return Ok(credential.clone());
            }
            _ => {}
        }

        let credential = self.fetch().await?;
        *state = CacheState::Cached(credential.clone());
        Ok(credential)
    }

    async fn close(&self) -> Result<(), AuthError> {
        *self.state.lock().await = CacheState::Closed;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "keycloak"
    }
}
