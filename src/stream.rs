//! Live byte stream carrying the secure agent's answer

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Response body handed from the extraction client to a sink
///
/// The stream has a single owner. Dropping it before the end discards the
/// remaining body and releases the underlying connection.
pub struct ResponseStream {
    inner: BoxStream<'static, std::io::Result<Bytes>>,
}

impl ResponseStream {
    /// Wrap any stream of byte chunks
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Stream the body of an HTTP response
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream().map_err(std::io::Error::other))
    }

    /// A stream yielding `data` as a single chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(futures::stream::once(futures::future::ready(Ok(
            data.into()
        ))))
    }

    /// Drain the whole stream into memory
    pub async fn read_to_end(mut self) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.inner.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer)
    }
}

impl Stream for ResponseStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}
