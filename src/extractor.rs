//! Pipeline orchestration: query the secure agent, hand the answer to a sink

use crate::auth::{AuthProvider, TokenProvider};
use crate::client::ExtractionClient;
use crate::config::Config;
use crate::dump::{DumpSink, Sink};
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;

/// Owns the token provider, query client and sink of one extraction
pub struct DataExtractor {
    query: String,
    client: ExtractionClient,
    tokens: Arc<dyn TokenProvider>,
    sink: Arc<dyn DumpSink>,
}

impl DataExtractor {
    /// Assemble an extractor from its parts
    ///
    /// `client` is expected to draw its tokens from `tokens`.
    pub fn new(
        query: impl Into<String>,
        client: ExtractionClient,
        tokens: Arc<dyn TokenProvider>,
        sink: Arc<dyn DumpSink>,
    ) -> Self {
        Self {
            query: query.into(),
            client,
            tokens,
            sink,
        }
    }

    /// Build the provider, client and sink named in `config` and read the query
    pub fn from_config(config: &Config) -> Result<Self> {
        let tokens: Arc<dyn TokenProvider> = Arc::new(AuthProvider::from_config(&config.auth)?);
        let sink: Arc<dyn DumpSink> = Arc::new(Sink::from_config(&config.sink)?);
        let client = ExtractionClient::from_config(Arc::clone(&tokens), &config.service)?;
        let query = config.read_query()?;
        Ok(Self::new(query, client, tokens, sink))
    }

    /// Run the query and upload its answer
    ///
    /// The first failure ends the run and is returned as
    /// [`Error::Pipeline`]; nothing is retried. The response stream is
    /// dropped on every path, releasing its connection.
    pub async fn run(&self) -> Result<()> {
        let data = self
            .client
            .extract(&self.query)
            .await
            .map_err(|e| Error::pipeline(e.into()))?;

        self.sink
            .upload(Some(data))
            .await
            .map_err(Error::pipeline)
    }

    /// Release the token provider and the sink
    ///
    /// Both releases are always attempted. Failures are logged and returned
    /// for inspection; they are never meant to replace a run's own error.
    pub async fn close(&self) -> Vec<Error> {
        let mut failures = Vec::new();

        if let Err(e) = self.tokens.close().await {
            tracing::warn!(provider = self.tokens.name(), error = %e, "Failed to close token provider");
            failures.push(e.into());
        }
        if let Err(e) = self.sink.close().await {
            tracing::warn!(sink = self.sink.name(), error = %e, "Failed to close data dumper");
            failures.push(e);
        }

        failures
    }

    /// Run, then close regardless of the outcome
    ///
    /// Only the run's result is returned.
    pub async fn run_and_close(&self) -> Result<()> {
        let result = self.run().await;
        self.close().await;
        result
    }

    /// Like [`run_and_close`](Self::run_and_close), but gives up with
    /// [`Error::Interrupted`] as soon as `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                tracing::warn!("Extraction interrupted");
                Err(Error::Interrupted)
            }
        };
        self.close().await;
        result
    }
}
