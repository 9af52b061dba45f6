//! # data-extractor
//!
//! Authenticated extraction from a secure agent into a pluggable sink.
//!
//! A run goes through three stages:
//! - a [`TokenProvider`] obtains a bearer token (Keycloak with caching, or
//!   Cognito),
//! - the [`ExtractionClient`] posts the query and streams the response back,
//! - a [`DumpSink`] consumes the stream (log lines, or an S3 object).
//!
//! [`DataExtractor`] owns all three and guarantees both the token provider
//! and the sink are released when the run is over. Nothing is retried.
//!
//! ## Quick Start
//!
//! ```no_run
//! use data_extractor::{Config, DataExtractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let extractor = DataExtractor::from_config(&config)?;
//!
//!     data_extractor::run_with_shutdown(&extractor).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bearer token providers
pub mod auth;
/// Secure agent query client
pub mod client;
/// Configuration types
pub mod config;
/// Response sinks
pub mod dump;
/// Error types
pub mod error;
/// Pipeline orchestration
pub mod extractor;
/// Response byte stream
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use auth::{AuthProvider, CognitoTokenProvider, Credential, KeycloakTokenProvider, TokenProvider};
pub use client::ExtractionClient;
pub use config::{AuthConfig, Config, SinkConfig};
pub use dump::{DumpSink, LogSink, ObjectKey, ObjectStoreSink, Sink};
pub use error::{AuthError, DumpError, Error, ExtractionError, Result, TransferError};
pub use extractor::DataExtractor;
pub use stream::ResponseStream;

/// Run the extractor until it finishes or a termination signal arrives.
///
/// Both the token provider and the sink are closed afterwards either way.
/// A signal ends the run with [`Error::Interrupted`].
///
/// - **Unix:** SIGTERM or SIGINT, whichever handlers could be registered.
/// - **Windows/other:** Ctrl+C.
///
/// If no signal can be listened for at all, the run is left to finish on
/// its own.
pub async fn run_with_shutdown(extractor: &DataExtractor) -> Result<()> {
    extractor.run_until(wait_for_signal()).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::SignalKind;

    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");
    if sigterm.is_none() && sigint.is_none() {
        return ctrl_c().await;
    }

    tokio::select! {
        _ = received(&mut sigterm) => tracing::info!("Received SIGTERM, stopping extraction"),
        _ = received(&mut sigint) => tracing::info!("Received SIGINT, stopping extraction"),
    }
}

#[cfg(unix)]
fn register(
    kind: tokio::signal::unix::SignalKind,
    name: &'static str,
) -> Option<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(kind)
        .inspect_err(|e| {
            tracing::warn!(signal = name, error = %e, "Could not register signal handler")
        })
        .ok()
}

/// Never resolves for a handler that is missing or has shut down
#[cfg(unix)]
async fn received(signal: &mut Option<tokio::signal::unix::Signal>) {
    if let Some(signal) = signal
        && signal.recv().await.is_some()
    {
        return;
    }
    std::future::pending().await
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, stopping extraction"),
        Err(e) => {
            tracing::error!(error = %e, "Could not listen for Ctrl+C, shutdown signals are ignored");
            std::future::pending().await
        }
    }
}
