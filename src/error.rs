//! Error types for data-extractor
//!
//! Every stage of the pipeline has its own error type so callers can tell an
//! authentication problem from a failed query or a failed upload:
//! - [`AuthError`] for token acquisition
//! - [`ExtractionError`] for the secure agent query
//! - [`DumpError`] (and its [`TransferError`] causes) for sinks
//!
//! [`Error`] is the crate-level type that wraps all of them. Lower-level
//! causes are always kept as `source()` so the whole chain can be logged.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for data-extractor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for data-extractor
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "auth.username")
        key: Option<String>,
    },

    /// The query file could not be read
    #[error("Could not read query file {path}: {source}")]
    Query {
        /// Location the query was read from
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Token acquisition failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The secure agent query failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// A sink failed to consume the response
    #[error(transparent)]
    Dump(#[from] DumpError),

    /// An argument was rejected before any work started
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Pipeline-level failure wrapping the step that failed
    #[error("{message}")]
    Pipeline {
        /// Message of the step that failed
        message: String,
        /// The step's error
        #[source]
        source: Box<Error>,
    },

    /// The run was aborted by a termination signal
    #[error("extraction interrupted by shutdown signal")]
    Interrupted,
}

impl Error {
    /// Wrap a step failure into a pipeline-level error, keeping its message
    pub fn pipeline(source: Error) -> Self {
        Error::Pipeline {
            message: source.to_string(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Token acquisition errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint answered with something other than 200
    #[error("Failed to authenticate. Status: {status}")]
    Status {
        /// HTTP status code returned by the identity provider
        status: u16,
    },

    /// The token response did not include an `id_token`
    #[error("No id token in response")]
    MissingIdToken,

    /// The identity provider answered without an authentication result
    /// (for example because it asked for an additional challenge)
    #[error("Authenticated response error. Invalid Username or Password")]
    NoAuthenticationResult {
        /// Challenge requested by the provider, if any
        challenge: Option<String>,
    },

    /// Transport failure talking to the identity provider
    #[error("Authentication failed due to I/O error: {0}")]
    Http(#[source] reqwest::Error),

    /// The identity provider returned a body that could not be decoded
    #[error("Unexpected error during authentication: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any failure of a user-scoped authentication flow
    #[error("Authentication failed for user: {username}")]
    User {
        /// Username the flow was attempted for
        username: String,
        /// What went wrong
        #[source]
        source: Box<AuthError>,
    },

    /// The provider was closed and can no longer issue tokens
    #[error("token provider is closed")]
    Closed,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Secure agent query errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// No bearer token could be obtained while building the request
    #[error("Could not generate token: {0}")]
    Token(#[source] AuthError),

    /// The secure agent answered with a non-2xx status
    ///
    /// The message already contains the status code and, when non-blank,
    /// the response body.
    #[error("{message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Full diagnostic message
        message: String,
    },

    /// Network-level failure sending the query or reading the error body
    #[error("Could not extract data from secure agent: {0}")]
    Request(#[source] reqwest::Error),

    /// The configured endpoint is not a valid URL
    #[error("Could not parse client URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Sink errors
#[derive(Debug, Error)]
pub enum DumpError {
    /// Reading the response stream failed
    #[error("Error reading query stream: {0}")]
    Read(#[source] std::io::Error),

    /// Uploading to the object store failed
    #[error("Failed to upload file to S3 bucket {bucket} with key {key}")]
    Upload {
        /// Destination bucket
        bucket: String,
        /// Destination object key
        key: String,
        /// Why the upload failed
        #[source]
        source: TransferError,
    },
}

/// Causes of a failed object-store transfer
#[derive(Debug, Error)]
pub enum TransferError {
    /// The object store rejected a request
    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),

    /// The source stream failed before all bytes were handed over
    #[error("failed to read source stream: {0}")]
    Source(#[source] std::io::Error),

    /// The sink was closed while the transfer was in flight
    #[error("object store client closed during transfer")]
    Closed,

    /// The transfer task panicked or was aborted
    #[error("transfer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
