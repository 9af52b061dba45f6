//! Sinks consuming the extracted response
//!
//! The core abstraction is the [`DumpSink`] trait. Two implementations are
//! provided:
//!
//! - [`LogSink`]: writes every response line to the log
//! - [`ObjectStoreSink`]: streams the response into a bucket as a
//!   multipart upload
//!
//! [`Sink`] selects one of them from configuration.
//!
//! Every sink rejects an absent stream with [`Error::InvalidInput`] before
//! touching anything else.

mod log;
mod s3;

pub use log::LogSink;
pub use s3::{MIN_PART_SIZE, ObjectKey, ObjectStoreSink};

use crate::config::SinkConfig;
use crate::error::Error;
use crate::stream::ResponseStream;
use async_trait::async_trait;

/// Terminal consumer of a response stream
#[async_trait]
pub trait DumpSink: Send + Sync {
    /// Consume `data` completely
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if `data` is `None`
    /// - [`Error::Dump`] if reading or storing the data fails
    async fn upload(&self, data: Option<ResponseStream>) -> crate::Result<()>;

    /// Release the sink; in-flight uploads fail
    async fn close(&self) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Sink selected from configuration
pub enum Sink {
    /// Log every line
    Log(LogSink),
    /// Upload to an object store
    ObjectStore(ObjectStoreSink),
}

impl Sink {
    /// Build the sink named in `config`
    pub fn from_config(config: &SinkConfig) -> crate::Result<Self> {
        let sink = match config {
            SinkConfig::Log => Sink::Log(LogSink),
            SinkConfig::S3(s3) => Sink::ObjectStore(ObjectStoreSink::from_config(s3)?),
        };
        tracing::info!(sink = config.kind_name(), "Data dumper configured");
        Ok(sink)
    }
}

#[async_trait]
impl DumpSink for Sink {
    async fn upload(&self, data: Option<ResponseStream>) -> crate::Result<()> {
        match self {
            Sink::Log(sink) => sink.upload(data).await,
            Sink::ObjectStore(sink) => sink.upload(data).await,
        }
    }

    async fn close(&self) -> crate::Result<()> {
        match self {
            Sink::Log(sink) => sink.close().await,
            Sink::ObjectStore(sink) => sink.close().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Sink::Log(sink) => sink.name(),
            Sink::ObjectStore(sink) => sink.name(),
        }
    }
}

pub(crate) fn require_stream(data: Option<ResponseStream>) -> crate::Result<ResponseStream> {
    data.ok_or_else(|| Error::InvalidInput("data stream is required".to_string()))
}
