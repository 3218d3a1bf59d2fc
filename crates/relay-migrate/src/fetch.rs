//! Source download.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{MigrationError, MigrationResult};

/// Raw bytes of a source reference.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Downloads the bytes behind a source URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> MigrationResult<FetchedSource>;
}

/// Plain GET with no credentials; signed URLs carry their own.
#[derive(Clone)]
pub struct HttpSourceFetcher {
    http: Client,
    timeout: Duration,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> MigrationResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("relay-migrate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, timeout })
    }

    async fn download(&self, url: &str) -> MigrationResult<FetchedSource> {
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "image/*, video/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MigrationError::FetchStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response.bytes().await?;

        Ok(FetchedSource { bytes, content_type })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> MigrationResult<FetchedSource> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.download(url)) => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    return Err(MigrationError::fetch_failed(format!(
                        "download timed out after {}ms",
                        self.timeout.as_millis()
                    )))
                }
            },
        };

        if fetched.bytes.is_empty() {
            return Err(MigrationError::fetch_failed("source returned an empty body"));
        }

        debug!(bytes = fetched.bytes.len(), content_type = ?fetched.content_type, "Fetched source");
        Ok(fetched)
    }
}
