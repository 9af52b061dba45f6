//! Sink that writes the response to the log

use super::{DumpSink, require_stream};
use crate::error::DumpError;
use crate::stream::ResponseStream;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Emits every line of the response as an info event
///
/// The response is decoded as UTF-8 with malformed sequences replaced by
/// U+FFFD. Lines end at `\n`, `\r\n` or a lone `\r`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl DumpSink for LogSink {
    async fn upload(&self, data: Option<ResponseStream>) -> crate::Result<()> {
        let data = require_stream(data)?;
        let mut reader = StreamReader::new(data);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(DumpError::Read)?;
            if read == 0 {
                return Ok(());
            }
            for line in split_lines(&buf) {
                tracing::info!("Response line: {}", String::from_utf8_lossy(line));
            }
        }
    }

    async fn close(&self) -> crate::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Split one `\n`-terminated chunk into lines, treating `\r` as a terminator too
fn split_lines(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    let chunk = chunk.strip_suffix(b"\n").unwrap_or(chunk);
    let chunk = chunk.strip_suffix(b"\r").unwrap_or(chunk);
    chunk.split(|&b| b == b'\r')
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use bytes::Bytes;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    const SPARQL_RESULT: &str = r#"<?xml version="1.0"?>
<sparql xmlns="http://www.w3.org/2005/sparql-results#">
  <head>
    <variable name="s"/>
    <variable name="p"/>
    <variable name="o"/>
  </head>
  <results>
  </results>
</sparql>
"#;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn response_lines(&self) -> Vec<String> {
            let output = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            output
                .lines()
                .filter_map(|line| line.find("Response line: ").map(|at| line[at..].to_string()))
                .collect()
        }
    }

    async fn upload_captured(data: ResponseStream) -> (crate::Result<()>, Captured) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .finish();

        // current-thread test runtime, so the default subscriber sees every event
        let _guard = tracing::subscriber::set_default(subscriber);
        let result = LogSink.upload(Some(data)).await;
        (result, captured)
    }

    #[tokio::test]
    async fn test_upload_logs_each_line() {
        let (result, captured) = upload_captured(ResponseStream::from_bytes(SPARQL_RESULT)).await;
        result.unwrap();

        let expected: Vec<String> = SPARQL_RESULT
            .lines()
            .map(|line| format!("Response line: {line}"))
            .collect();
        assert_eq!(captured.response_lines(), expected);
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks_are_joined() {
        let chunks = vec![
            Ok(Bytes::from_static(b"first li")),
            Ok(Bytes::from_static(b"ne\nsecond")),
            Ok(Bytes::from_static(b" line")),
        ];
        let (result, captured) =
            upload_captured(ResponseStream::new(futures::stream::iter(chunks))).await;
        result.unwrap();

        assert_eq!(
            captured.response_lines(),
            vec!["Response line: first line", "Response line: second line"]
        );
    }

    #[tokio::test]
    async fn test_read_failure_is_dump_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"line\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];

        let err = LogSink
            .upload(Some(ResponseStream::new(futures::stream::iter(chunks))))
            .await
            .unwrap_err();

        match err {
            Error::Dump(DumpError::Read(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset)
            }
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_and_logged() {
        let (result, captured) =
            upload_captured(ResponseStream::from_bytes(vec![b'o', b'k', 0xff, b'\n'])).await;
        result.unwrap();

        assert_eq!(captured.response_lines(), vec!["Response line: ok\u{FFFD}"]);
    }

    #[tokio::test]
    async fn test_carriage_returns_end_lines() {
        let (result, captured) =
            upload_captured(ResponseStream::from_bytes("a\rb\r\nc\r\n\r\nd")).await;
        result.unwrap();

        assert_eq!(
            captured.response_lines(),
            vec![
                "Response line: a",
                "Response line: b",
                "Response line: c",
                "Response line: ",
                "Response line: d",
            ]
        );
    }

    #[test]
    fn test_split_lines() {
        fn split(chunk: &[u8]) -> Vec<&str> {
            split_lines(chunk)
                .map(|line| std::str::from_utf8(line).unwrap())
                .collect()
        }

        assert_eq!(split(b"plain\n"), vec!["plain"]);
        assert_eq!(split(b"crlf\r\n"), vec!["crlf"]);
        assert_eq!(split(b"x\r\ry"), vec!["x", "", "y"]);
        assert_eq!(split(b"tail"), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_absent_stream_is_invalid_input() {
        let err = LogSink.upload(None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
