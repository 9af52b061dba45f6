//! Bearer token acquisition
//!
//! The core abstraction is the [`TokenProvider`] trait. Two implementations
//! are provided:
//!
//! - [`KeycloakTokenProvider`]: OpenID Connect password grant, caches the
//!   issued token until shortly before it expires
//! - [`CognitoTokenProvider`]: Cognito user-password flow, authenticates on
//!   every call
//!
//! [`AuthProvider`] selects one of them from configuration.

mod cognito;
mod keycloak;

pub use cognito::CognitoTokenProvider;
pub use keycloak::KeycloakTokenProvider;

use crate::config::AuthConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};

/// A credential is never handed out once it is this close to expiry
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Token lifetime assumed when the identity provider does not declare one
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Connect and request timeout for identity provider calls
pub(crate) const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Bearer token plus the instant it stops being valid
///
/// Credentials are immutable; a refresh replaces the whole value.
#[derive(Clone)]
pub struct Credential {
    token: String,
    expires_at: Instant,
}

impl Credential {
    /// Create a credential issued now and valid for `lifetime`
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    /// The bearer token
    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Instant the identity provider considers the token expired
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the credential may still be handed out at `now`
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now + EXPIRY_SAFETY_MARGIN < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of bearer tokens for the secure agent
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a credential that is valid for at least [`EXPIRY_SAFETY_MARGIN`]
    async fn token(&self) -> Result<Credential, AuthError>;

    /// Release the provider; later [`token`](TokenProvider::token) calls fail
    async fn close(&self) -> Result<(), AuthError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Token provider selected from configuration
pub enum AuthProvider {
    /// Keycloak token endpoint
    Keycloak(KeycloakTokenProvider),
    /// Cognito user-password flow
    Cognito(CognitoTokenProvider),
}

impl AuthProvider {
    /// Build the provider named in `config`
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        let provider = match config {
            AuthConfig::Keycloak(keycloak) => {
                AuthProvider::Keycloak(KeycloakTokenProvider::from_config(keycloak)?)
            }
            AuthConfig::Cognito(cognito) => {
                AuthProvider::Cognito(CognitoTokenProvider::from_config(cognito)?)
            }
        };
        tracing::info!(provider = provider.name(), "Authenticator configured");
        Ok(provider)
    }
}

#[async_trait]
impl TokenProvider for AuthProvider {
    async fn token(&self) -> Result<Credential, AuthError> {
        match self {
            AuthProvider::Keycloak(provider) => provider.token().await,
            AuthProvider::Cognito(provider) => provider.token().await,
        }
    }

    async fn close(&self) -> Result<(), AuthError> {
        match self {
            AuthProvider::Keycloak(provider) => provider.close().await,
            AuthProvider::Cognito(provider) => provider.close().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            AuthProvider::Keycloak(provider) => provider.name(),
            AuthProvider::Cognito(provider) => provider.name(),
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .connect_timeout(AUTH_TIMEOUT)
        .timeout(AUTH_TIMEOUT)
        .build()
        .map_err(AuthError::Http)
}
