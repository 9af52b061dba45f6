//! Test doubles for token providers and sinks

use crate::auth::{Credential, DEFAULT_TOKEN_LIFETIME, TokenProvider};
use crate::dump::DumpSink;
use crate::error::{AuthError, DumpError, Error};
use crate::stream::ResponseStream;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Always hands out the same token
pub(crate) struct StaticTokenProvider {
    token: String,
    pub(crate) closes: AtomicUsize,
    fail_close: bool,
}

impl StaticTokenProvider {
    pub(crate) fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            closes: AtomicUsize::new(0),
            fail_close: false,
        }
    }

    pub(crate) fn failing_close(token: &str) -> Self {
        Self {
            fail_close: true,
            ..Self::new(token)
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<Credential, AuthError> {
        Ok(Credential::new(self.token.clone(), DEFAULT_TOKEN_LIFETIME))
    }

    async fn close(&self) -> Result<(), AuthError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(AuthError::Other("token provider close failed".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Fails every token request with [`AuthError::Other`]
pub(crate) struct FailingTokenProvider {
    message: String,
}

impl FailingTokenProvider {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for FailingTokenProvider {
    async fn token(&self) -> Result<Credential, AuthError> {
        Err(AuthError::Other(self.message.clone()))
    }

    async fn close(&self) -> Result<(), AuthError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Records everything uploaded to it
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) uploads: Mutex<Vec<Vec<u8>>>,
    pub(crate) closes: AtomicUsize,
    fail_upload: bool,
    fail_close: bool,
}

impl RecordingSink {
    pub(crate) fn failing_upload() -> Self {
        Self {
            fail_upload: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DumpSink for RecordingSink {
    async fn upload(&self, data: Option<ResponseStream>) -> crate::Result<()> {
        let data = data.ok_or_else(|| Error::InvalidInput("data stream is required".into()))?;
        if self.fail_upload {
            return Err(DumpError::Read(std::io::Error::other("sink rejected data")).into());
        }
        let bytes = data.read_to_end().await.map_err(DumpError::Read)?;
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(bytes);
        }
        Ok(())
    }

    async fn close(&self) -> crate::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::Dump(DumpError::Read(std::io::Error::other(
                "sink close failed",
            ))));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
