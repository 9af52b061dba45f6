//! Object-store sink
//!
//! The response arrives as a stream the caller drains; the object store
//! wants a multipart upload whose parts are sent by background tasks. The two
//! are bridged with a bounded channel:
//!
//! ```text
//! caller task                      transfer task
//! ───────────                      ─────────────
//! ResponseStream ──chunks──► mpsc ──► WriteMultipart ──parts──► object store
//!        (writer)                       (finish after channel closes)
//! ```
//!
//! The writer runs on the caller's task and the transfer on its own task, so
//! a full channel only parks the writer while part uploads keep draining it.
//! The upload is completed only after the writer has handed over every
//! chunk and confirmed it on a oneshot. A channel that closes without that
//! confirmation (writer failed, upload future dropped, sink closed) aborts
//! the multipart upload so nothing partial is committed.

use super::{DumpSink, require_stream};
use crate::config::S3Config;
use crate::error::{DumpError, Error, TransferError};
use crate::stream::ResponseStream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutResult, WriteMultipart};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Multipart part size used unless configured otherwise (8 MiB)
pub const MIN_PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts uploaded concurrently unless configured otherwise
const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Chunks buffered between the writer and the transfer task
const CHANNEL_DEPTH: usize = 16;

const KEY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";
const KEY_EXTENSION: &str = "rdf";

/// Destination key of a single upload
///
/// Formatted as `yyyy-MM-dd-HH:mm:ss.SSSS_NNNN.rdf` in the host's local
/// time zone, where `NNNN` is a random number below 1000. A new key is
/// minted for every upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Mint a key for an upload starting now
    pub fn generate() -> Self {
        let disambiguator = rand::thread_rng().gen_range(0..1000);
        Self::at(Local::now(), disambiguator)
    }

    fn at<Tz>(now: DateTime<Tz>, disambiguator: u16) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        // leap seconds report up to 2e9 nanoseconds
        let ten_thousandths = (now.timestamp_subsec_nanos() % 1_000_000_000) / 100_000;
        Self(format!(
            "{}.{:04}_{:04}.{}",
            now.format(KEY_TIMESTAMP_FORMAT),
            ten_thousandths,
            disambiguator,
            KEY_EXTENSION
        ))
    }

    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streams each response into a new object of a bucket
pub struct ObjectStoreSink {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    part_size: usize,
    max_concurrency: usize,
    shutdown: CancellationToken,
}

impl ObjectStoreSink {
    /// Create a sink writing to `store`, reported as `bucket` in logs and errors
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
            part_size: MIN_PART_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create an S3 sink from configuration
    pub fn from_config(config: &S3Config) -> crate::Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(config.allow_http);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder
            .build()
            .map_err(|e| Error::config(format!("invalid S3 configuration: {e}"), "sink"))?;

        Ok(Self::new(&config.bucket, Arc::new(store))
            .with_part_size(config.part_size)
            .with_max_concurrency(config.max_concurrency))
    }

    /// Set the multipart part size in bytes
    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Set how many parts may be in flight at once
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Bucket uploads are written to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Drain `data` into the transfer channel
    ///
    /// Returns early without error when the transfer task has gone away; the
    /// transfer's own result explains why.
    async fn write(
        &self,
        mut data: ResponseStream,
        chunks: &mpsc::Sender<Bytes>,
    ) -> Result<(), TransferError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(TransferError::Closed),
                next = data.next() => next,
            };
            let Some(chunk) = next else {
                return Ok(());
            };
            let chunk = chunk.map_err(TransferError::Source)?;
            if chunk.is_empty() {
                continue;
            }
            if chunks.send(chunk).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl DumpSink for ObjectStoreSink {
    async fn upload(&self, data: Option<ResponseStream>) -> crate::Result<()> {
        let data = require_stream(data)?;
        let key = ObjectKey::generate();
        tracing::debug!(bucket = %self.bucket, key = %key, "starting multipart upload");

        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let (handed_over, all_written) = oneshot::channel();
        let cancel = self.shutdown.child_token();
        // cancels the transfer if this future is dropped before it resolves
        let interrupted = cancel.clone().drop_guard();
        let transfer = tokio::spawn(transfer(
            Arc::clone(&self.store),
            Path::from(key.as_str()),
            Chunks {
                receiver,
                all_written,
            },
            cancel.clone(),
            self.part_size,
            self.max_concurrency,
        ));

        let written = self.write(data, &sender).await;
        match &written {
            Ok(()) => {
                let _ = handed_over.send(());
            }
            Err(_) => cancel.cancel(),
        }
        drop(sender);

        let completed = match transfer.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::Join(e)),
        };
        interrupted.disarm();

        match written.and(completed) {
            Ok(put) => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %key,
                    e_tag = ?put.e_tag,
                    "Successfully uploaded file to S3 bucket"
                );
                Ok(())
            }
            Err(source) => Err(DumpError::Upload {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            }
            .into()),
        }
    }

    async fn close(&self) -> crate::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

/// Receiving half of the bridge
struct Chunks {
    receiver: mpsc::Receiver<Bytes>,
    /// Resolves once the writer has sent its last chunk
    all_written: oneshot::Receiver<()>,
}

/// Feed chunks from `chunks` into a multipart upload of `path`
///
/// Completes the upload only if the writer confirmed the end of its data
/// and `cancel` has not fired.
async fn transfer(
    store: Arc<dyn ObjectStore>,
    path: Path,
    chunks: Chunks,
    cancel: CancellationToken,
    part_size: usize,
    max_concurrency: usize,
) -> Result<PutResult, TransferError> {
    let upload = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Closed),
        upload = store.put_multipart(&path) => upload?,
    };
    let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);
    let Chunks {
        mut receiver,
        all_written,
    } = chunks;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = receiver.recv() => Some(next),
        };
        let chunk = match next {
            None => {
                discard(writer).await;
                return Err(TransferError::Closed);
            }
            Some(None) => break,
            Some(Some(chunk)) => chunk,
        };

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Closed),
            ready = writer.wait_for_capacity(max_concurrency) => ready.map_err(TransferError::from),
        };
        if let Err(e) = ready {
            discard(writer).await;
            return Err(e);
        }
        writer.put(chunk);
    }

    // a dropped sender alone does not mean the source was drained
    let confirmed = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        confirmed = all_written => confirmed.is_ok(),
    };
    if !confirmed {
        tracing::debug!(path = %path, "source not fully written, aborting multipart upload");
        discard(writer).await;
        return Err(TransferError::Closed);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Closed),
        put = writer.finish() => put.map_err(TransferError::from),
    }
}

async fn discard(writer: WriteMultipart) {
    if let Err(e) = writer.abort().await {
        tracing::debug!(error = %e, "failed to abort multipart upload");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};
    use futures::TryStreamExt;
    use object_store::memory::InMemory;
    use regex::Regex;
    use std::error::Error as _;
    use std::time::Duration;
    use tokio::sync::Notify;

    const BUCKET: &str = "test-bucket";
    const KEY_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}-\d{2}:\d{2}:\d{2}\.\d{4}_\d{4}\.rdf$";

    fn sink(store: &Arc<InMemory>) -> ObjectStoreSink {
        ObjectStoreSink::new(BUCKET, Arc::clone(store) as Arc<dyn ObjectStore>)
    }

    async fn stored_objects(store: &InMemory) -> Vec<(String, Bytes)> {
        let metas: Vec<_> = store.list(None).try_collect().await.unwrap();
        let mut objects = Vec::new();
        for meta in metas {
            let data = store.get(&meta.location).await.unwrap().bytes().await.unwrap();
            objects.push((meta.location.to_string(), data));
        }
        objects
    }

    fn chunked(data: &[u8], chunk_size: usize) -> ResponseStream {
        let chunks: Vec<std::io::Result<Bytes>> = data
            .chunks(chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        ResponseStream::new(futures::stream::iter(chunks))
    }

    #[test]
    fn test_key_format() {
        let now = Utc
            .with_ymd_and_hms(2025, 3, 4, 5, 6, 7)
            .unwrap()
            .with_nanosecond(89_000_000)
            .unwrap();

        assert_eq!(
            ObjectKey::at(now, 42).as_str(),
            "2025-03-04-05:06:07.0890_0042.rdf"
        );
        assert_eq!(
            ObjectKey::at(now, 999).as_str(),
            "2025-03-04-05:06:07.0890_0999.rdf"
        );
    }

    #[test]
    fn test_generated_keys_match_pattern() {
        let pattern = Regex::new(KEY_PATTERN).unwrap();
        for _ in 0..100 {
            let key = ObjectKey::generate();
            assert!(pattern.is_match(key.as_str()), "bad key {key}");
        }
    }

    #[test]
    fn test_generated_key_uses_local_time() {
        let before = Local::now().format(KEY_TIMESTAMP_FORMAT).to_string();
        let key = ObjectKey::generate();
        let after = Local::now().format(KEY_TIMESTAMP_FORMAT).to_string();

        assert!(
            key.as_str().starts_with(&before) || key.as_str().starts_with(&after),
            "{key} not stamped between {before} and {after}"
        );
    }

    #[tokio::test]
    async fn test_upload_round_trip() {
        let store = Arc::new(InMemory::new());

        sink(&store)
            .upload(Some(ResponseStream::from_bytes("test-data")))
            .await
            .unwrap();

        let objects = stored_objects(&store).await;
        assert_eq!(objects.len(), 1);
        let (key, data) = &objects[0];
        assert!(Regex::new(KEY_PATTERN).unwrap().is_match(key), "bad key {key}");
        assert_eq!(data.as_ref(), b"test-data");
    }

    #[tokio::test]
    async fn test_each_upload_gets_a_new_object() {
        let store = Arc::new(InMemory::new());
        let sink = sink(&store);

        sink.upload(Some(ResponseStream::from_bytes("one"))).await.unwrap();
        // keep the millisecond timestamps apart
        tokio::time::sleep(Duration::from_millis(2)).await;
        sink.upload(Some(ResponseStream::from_bytes("two"))).await.unwrap();

        let mut contents: Vec<_> = stored_objects(&store)
            .await
            .into_iter()
            .map(|(_, data)| data)
            .collect();
        contents.sort();
        assert_eq!(contents, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_part_upload_preserves_bytes() {
        let store = Arc::new(InMemory::new());
        let payload: Vec<u8> = (0..=255u8).cycle().take(256 * 1024).collect();

        sink(&store)
            .with_part_size(16 * 1024)
            .with_max_concurrency(2)
            .upload(Some(chunked(&payload, 4096)))
            .await
            .unwrap();

        let objects = stored_objects(&store).await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].1.as_ref(), payload.as_slice());
    }

    // The writer blocks on a full channel while the transfer waits for part
    // capacity. Both run as separate tasks, so even a single-threaded
    // runtime keeps making progress; the timeout turns a deadlock into a
    // failure instead of a hang.
    #[tokio::test(flavor = "current_thread")]
    async fn test_bridge_does_not_deadlock_on_single_thread() {
        let store = Arc::new(InMemory::new());
        let payload = vec![7u8; CHANNEL_DEPTH * 64 * 1024];
        let sink = sink(&store).with_part_size(1024).with_max_concurrency(1);

        tokio::time::timeout(
            Duration::from_secs(30),
            sink.upload(Some(chunked(&payload, 1024))),
        )
        .await
        .expect("upload deadlocked")
        .unwrap();

        assert_eq!(stored_objects(&store).await[0].1.len(), payload.len());
    }

    #[tokio::test]
    async fn test_absent_stream_touches_nothing() {
        let store = Arc::new(InMemory::new());

        let err = sink(&store).upload(None).await.unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(stored_objects(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_commits_nothing() {
        let store = Arc::new(InMemory::new());
        let chunks = vec![
            Ok(Bytes::from_static(b"partial data")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];

        let err = sink(&store)
            .upload(Some(ResponseStream::new(futures::stream::iter(chunks))))
            .await
            .unwrap_err();

        match &err {
            Error::Dump(DumpError::Upload { bucket, source, .. }) => {
                assert_eq!(bucket, BUCKET);
                assert!(matches!(source, TransferError::Source(_)));
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        assert!(stored_objects(&store).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_fails_in_flight_upload() {
        let store = Arc::new(InMemory::new());
        let sink = Arc::new(sink(&store));
        let started = Arc::new(Notify::new());

        // one chunk, then a source that never finishes
        let signal = Arc::clone(&started);
        let data = ResponseStream::new(
            futures::stream::once(async move {
                signal.notify_one();
                Ok(Bytes::from_static(b"test-data"))
            })
            .chain(futures::stream::pending()),
        );

        let uploading = Arc::clone(&sink);
        let task = tokio::spawn(async move { uploading.upload(Some(data)).await });

        started.notified().await;
        sink.close().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("upload should fail once the sink is closed")
            .unwrap()
            .unwrap_err();

        assert!(
            err.to_string()
                .starts_with("Failed to upload file to S3 bucket test-bucket with key "),
            "{err}"
        );
        let Error::Dump(dump) = &err else {
            panic!("expected dump error, got {err:?}");
        };
        assert!(matches!(
            dump.source().and_then(|s| s.downcast_ref::<TransferError>()),
            Some(TransferError::Closed)
        ));
        assert!(stored_objects(&store).await.is_empty());
    }

    fn stalled_after(chunk: &'static [u8]) -> ResponseStream {
        ResponseStream::new(
            futures::stream::once(async move { Ok(Bytes::from_static(chunk)) })
                .chain(futures::stream::pending()),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_upload_commits_nothing() {
        let store = Arc::new(InMemory::new());
        let sink = sink(&store);

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            sink.upload(Some(stalled_after(b"partial"))),
        )
        .await;
        assert!(result.is_err(), "upload should still be waiting on its source");

        // give the detached transfer task time to settle
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(stored_objects(&store).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_upload_then_close_commits_nothing() {
        let store = Arc::new(InMemory::new());

        for _ in 0..20 {
            let sink = sink(&store);
            let result = tokio::time::timeout(
                Duration::from_millis(20),
                sink.upload(Some(stalled_after(b"partial"))),
            )
            .await;
            assert!(result.is_err());
            sink.close().await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(stored_objects(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_upload_after_close_fails() {
        let store = Arc::new(InMemory::new());
        let sink = sink(&store);
        sink.close().await.unwrap();

        let err = sink
            .upload(Some(ResponseStream::from_bytes("late")))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Dump(DumpError::Upload { .. })));
        assert!(stored_objects(&store).await.is_empty());
    }
}
