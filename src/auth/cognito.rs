//! Cognito user-password token provider

use super::{Credential, DEFAULT_TOKEN_LIFETIME, TokenProvider, http_client};
use crate::config::CognitoConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const AMZ_JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const USER_PASSWORD_AUTH: &str = "USER_PASSWORD_AUTH";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthRequest<'a> {
    auth_flow: &'a str,
    client_id: &'a str,
    auth_parameters: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Token provider using the Cognito `USER_PASSWORD_AUTH` flow
///
/// Every call performs a fresh handshake; nothing is cached. All failures
/// are reported as [`AuthError::User`] naming the username attempted.
pub struct CognitoTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    username: String,
    password: String,
    closed: AtomicBool,
}

impl CognitoTokenProvider {
    /// Create a provider talking to `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            username: username.into(),
            password: password.into(),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a provider from configuration
    pub fn from_config(config: &CognitoConfig) -> Result<Self, AuthError> {
        Self::new(
            config.endpoint(),
            &config.client_id,
            &config.username,
            &config.password,
        )
    }

    async fn initiate_auth(&self) -> Result<InitiateAuthResponse, AuthError> {
        let request = InitiateAuthRequest {
            auth_flow: USER_PASSWORD_AUTH,
            client_id: &self.client_id,
            auth_parameters: HashMap::from([
                ("USERNAME", self.username.as_str()),
                ("PASSWORD", self.password.as_str()),
            ]),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON_CONTENT_TYPE)
            .header("X-Amz-Target", INITIATE_AUTH_TARGET)
            .body(serde_json::to_vec(&request)?)
            .send()
            .await
            .map_err(AuthError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(AuthError::Http)?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn authenticate(&self) -> Result<Credential, AuthError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }

        let response = self.initiate_auth().await?;
        tracing::debug!(
            challenge = ?response.challenge_name,
            has_session = response.session.is_some(),
            "cognito authentication response"
        );

        let Some(result) = response.authentication_result else {
            tracing::error!(username = %self.username, "Authentication response failed");
            return Err(AuthError::NoAuthenticationResult {
                challenge: response.challenge_name,
            });
        };

        let token = result.id_token.ok_or(AuthError::MissingIdToken)?;
        let lifetime = result
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        tracing::info!(username = %self.username, "Authentication successful");
        tracing::debug!(
            token_type = ?result.token_type,
            expires_in = lifetime.as_secs(),
            "cognito token issued"
        );
        Ok(Credential::new(token, lifetime))
    }
}

#[async_trait]
impl TokenProvider for CognitoTokenProvider {
    async fn token(&self) -> Result<Credential, AuthError> {
        self.authenticate().await.map_err(|e| AuthError::User {
            username: self.username.clone(),
            source: Box::new(e),
        })
    }

    async fn close(&self) -> Result<(), AuthError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cognito"
    }
}
