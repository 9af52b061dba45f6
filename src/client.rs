//! Secure agent query client

use crate::auth::TokenProvider;
use crate::config::ServiceConfig;
use crate::error::ExtractionError;
use crate::stream::ResponseStream;
use std::sync::Arc;
use url::Url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Issues authenticated queries against the secure agent
///
/// A bearer token is requested from the [`TokenProvider`] each time a
/// request is built; the client never keeps one of its own.
pub struct ExtractionClient {
    client: reqwest::Client,
    endpoint: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl ExtractionClient {
    /// Create a client for `endpoint`
    pub fn new(tokens: Arc<dyn TokenProvider>, endpoint: &str) -> Result<Self, ExtractionError> {
        Self::with_client(tokens, endpoint, reqwest::Client::new())
    }

    /// Create a client from configuration
    pub fn from_config(
        tokens: Arc<dyn TokenProvider>,
        config: &ServiceConfig,
    ) -> Result<Self, ExtractionError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ExtractionError::Request)?;
        Self::with_client(tokens, &config.url, client)
    }

    fn with_client(
        tokens: Arc<dyn TokenProvider>,
        endpoint: &str,
        client: reqwest::Client,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            tokens,
        })
    }

    /// Send `query` and return the response body as a live stream
    ///
    /// The query is sent as `query=<query>` without further encoding. Any
    /// status outside 2xx is turned into [`ExtractionError::Status`] with the
    /// response body attached when it is not blank.
    pub async fn extract(&self, query: &str) -> Result<ResponseStream, ExtractionError> {
        let request = self.build_request(query).await?;
        let response = request.send().await.map_err(ExtractionError::Request)?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Secure agent query successful");
            return Ok(ResponseStream::from_response(response));
        }

        tracing::warn!(
            "Secure agent query unsuccessful, received status {}",
            status.as_u16()
        );
        Err(unsuccessful(status.as_u16(), response).await)
    }

    async fn build_request(&self, query: &str) -> Result<reqwest::RequestBuilder, ExtractionError> {
        let credential = self.tokens.token().await.map_err(ExtractionError::Token)?;

        Ok(self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("bearer {}", credential.secret()),
            )
            .body(format!("query={query}")))
    }
}

async fn unsuccessful(status: u16, response: reqwest::Response) -> ExtractionError {
    let mut message =
        format!("Could not extract data from secure agent. Received status code '{status}'.");

    match response.text().await {
        Ok(body) => {
            if !body.trim().is_empty() {
                message.push_str("\nResponse body:\n");
                message.push_str(&body);
            }
            ExtractionError::Status { status, message }
        }
        Err(e) => ExtractionError::Request(e),
    }
}
