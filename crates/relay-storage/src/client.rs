//! Resilient object-storage client.
//!
//! Every operation goes through the same pipeline:
//! - Circuit breaker admission (fail fast while open)
//! - Scoped token from the cache, minted on demand
//! - Per-call timeout raced against cancellation
//! - One silent token refresh on auth expiry
//! - Exponential backoff with jitter for retryable failures
//! - Observability (tracing spans, metrics)

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use relay_models::ContainerStats;
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, LAST_MODIFIED, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
use crate::error::{parse_retry_after, StorageError, StorageResult};
use crate::metrics::{record_circuit_rejection, record_request};
use crate::retry::{with_retry, RetryPolicy};
use crate::token::{
    HttpTokenBroker, SasToken, TokenBroker, TokenBrokerConfig, TokenPermission, TokenRequest, TokenScope,
};
use crate::token_cache::TokenCache;

const STORAGE_API_VERSION: &str = "2023-11-03";
const META_HEADER_PREFIX: &str = "x-ms-meta-";
const MIGRATED_AT_KEY: &str = "migrated_at";

// =============================================================================
// Configuration
// =============================================================================

/// Storage client configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base URL of the storage account (durable host)
    pub account_url: String,
    /// Token-minting endpoint
    pub token_endpoint: String,
    /// Per-call timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Backoff policy
    pub retry: RetryPolicy,
    /// Circuit breaker tuning
    pub breaker: CircuitBreakerConfig,
    /// Default token TTL
    pub token_ttl_minutes: u32,
    /// Maximum token TTL
    pub token_max_ttl_minutes: u32,
}

impl StorageConfig {
    /// Config with default tuning.
    pub fn new(account_url: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        Self {
            account_url: account_url.into(),
            token_endpoint: token_endpoint.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            token_ttl_minutes: 15,
            token_max_ttl_minutes: 60,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let account_url = std::env::var("RELAY_STORAGE_ACCOUNT_URL")
            .map_err(|_| StorageError::config_error("RELAY_STORAGE_ACCOUNT_URL not set"))?;

        Url::parse(&account_url).map_err(|e| {
            StorageError::config_error(format!("RELAY_STORAGE_ACCOUNT_URL is not a valid URL: {}", e))
        })?;

        let broker = TokenBrokerConfig::from_env()?;

        let connect_timeout_secs: u64 = std::env::var("RELAY_STORAGE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            account_url,
            token_endpoint: broker.endpoint,
            timeout: broker.timeout,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryPolicy::from_env(),
            breaker: CircuitBreakerConfig::from_env(),
            token_ttl_minutes: broker.default_ttl_minutes,
            token_max_ttl_minutes: broker.max_ttl_minutes,
        })
    }

    /// Broker settings derived from this config.
    pub fn broker_config(&self) -> TokenBrokerConfig {
        TokenBrokerConfig {
            endpoint: self.token_endpoint.clone(),
            default_ttl_minutes: self.token_ttl_minutes,
            max_ttl_minutes: self.token_max_ttl_minutes,
            timeout: self.timeout,
        }
    }

    /// `host[:port]` of the storage account.
    pub fn account_authority(&self) -> Option<String> {
        let url = Url::parse(&self.account_url).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Durable URL (no signature)
    pub url: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Blob contents plus what the store knows about them.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl BlobInfo {
    /// Recorded migration time, falling back to `Last-Modified`.
    pub fn migrated_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(MIGRATED_AT_KEY)
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|at| at.with_timezone(&Utc))
            .or(self.last_modified)
    }
}

// =============================================================================
// Client
// =============================================================================

/// Object-storage client with retry, circuit breaking and scoped tokens.
///
/// Clones share the breaker and the token cache.
#[derive(Clone)]
pub struct ResilientStorageClient {
    http: Client,
    config: StorageConfig,
    breaker: CircuitBreaker,
    tokens: Arc<TokenCache>,
}

impl ResilientStorageClient {
    /// Create a client that mints tokens from the configured HTTP endpoint.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let broker = HttpTokenBroker::new(config.broker_config())?;
        Self::with_broker(config, Arc::new(broker))
    }

    /// Create a client with a custom token broker.
    pub fn with_broker(config: StorageConfig, broker: Arc<dyn TokenBroker>) -> StorageResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("relay-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StorageError::Network)?;

        Ok(Self {
            http,
            breaker: CircuitBreaker::new(config.breaker),
            tokens: Arc::new(TokenCache::new(broker)),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(StorageConfig::from_env()?)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Breaker snapshot for health reporting.
    pub fn circuit_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    // =========================================================================
    // Blob Operations
    // =========================================================================

    /// Upload bytes as a block blob.
    ///
    /// Metadata values are percent-encoded so arbitrary text survives the
    /// header round trip. The returned URL carries no signature.
    pub async fn upload_blob(
        &self,
        container: &str,
        blob_name: &str,
        data: Bytes,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> StorageResult<UploadResult> {
        let request = TokenRequest::new(TokenScope::blob(container, blob_name), TokenPermission::Write);
        let size = data.len();

        let result = self
            .execute("upload_blob", request, cancel, |token| {
                let data = data.clone();
                async move {
                    let mut builder = self
                        .http
                        .put(&token.url)
                        .header("x-ms-blob-type", "BlockBlob")
                        .header("x-ms-version", STORAGE_API_VERSION)
                        .header(CONTENT_TYPE, content_type);

                    for (key, value) in metadata {
                        builder = builder.header(
                            format!("{}{}", META_HEADER_PREFIX, key.to_ascii_lowercase()),
                            urlencoding::encode(value).into_owned(),
                        );
                    }

                    let response = builder.body(data).send().await.map_err(StorageError::from_transport)?;
                    if !response.status().is_success() {
                        return Err(Self::handle_error_response(response).await);
                    }

                    Ok(UploadResult {
                        url: durable_url(&token.url)?,
                        etag: header_string(response.headers(), ETAG.as_str()),
                        last_modified: header_string(response.headers(), LAST_MODIFIED.as_str())
                            .and_then(|v| parse_http_date(&v)),
                    })
                }
            })
            .await?;

        info!(container = %container, blob_name = %blob_name, bytes = size, "Uploaded blob");
        Ok(result)
    }

    /// Download a blob with its content type and decoded metadata.
    pub async fn download_blob(
        &self,
        container: &str,
        blob_name: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<DownloadResult> {
        let request = TokenRequest::new(TokenScope::blob(container, blob_name), TokenPermission::Read);

        self.execute("download_blob", request, cancel, |token| async move {
            let response = self
                .http
                .get(&token.url)
                .header("x-ms-version", STORAGE_API_VERSION)
                .send()
                .await
                .map_err(StorageError::from_transport)?;

            if !response.status().is_success() {
                return Err(Self::handle_error_response(response).await);
            }

            let content_type = header_string(response.headers(), CONTENT_TYPE.as_str());
            let metadata = metadata_from_headers(response.headers());
            let bytes = response.bytes().await.map_err(StorageError::from_transport)?;

            Ok(DownloadResult {
                bytes,
                content_type,
                metadata,
            })
        })
        .await
    }

    /// Delete a blob. Returns `false` if it did not exist.
    pub async fn delete_blob(
        &self,
        container: &str,
        blob_name: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<bool> {
        let request = TokenRequest::new(TokenScope::blob(container, blob_name), TokenPermission::Delete);

        let deleted = self
            .execute("delete_blob", request, cancel, |token| async move {
                let response = self
                    .http
                    .delete(&token.url)
                    .header("x-ms-version", STORAGE_API_VERSION)
                    .send()
                    .await
                    .map_err(StorageError::from_transport)?;

                match response.status() {
                    s if s.is_success() => Ok(true),
                    StatusCode::NOT_FOUND => Ok(false),
                    _ => Err(Self::handle_error_response(response).await),
                }
            })
            .await?;

        debug!(container = %container, blob_name = %blob_name, deleted, "Delete blob");
        Ok(deleted)
    }

    /// List every blob in a container, following continuation markers.
    pub async fn list_blobs(
        &self,
        container: &str,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<BlobInfo>> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(container, prefix, marker.as_deref(), None, cancel).await?;
            blobs.extend(page.blobs);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!(container = %container, count = blobs.len(), "Listed blobs");
        Ok(blobs)
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
        max_results: Option<u32>,
        cancel: &CancellationToken,
    ) -> StorageResult<ListPage> {
        let request = TokenRequest::new(TokenScope::container(container), TokenPermission::List);

        self.execute("list_blobs", request, cancel, |token| async move {
            let mut url = parse_url(&token.url)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                query.append_pair("include", "metadata");
                if let Some(prefix) = prefix {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = marker {
                    query.append_pair("marker", marker);
                }
                if let Some(max) = max_results {
                    query.append_pair("maxresults", &max.to_string());
                }
            }

            let response = self
                .http
                .get(url)
                .header("x-ms-version", STORAGE_API_VERSION)
                .send()
                .await
                .map_err(StorageError::from_transport)?;

            if !response.status().is_success() {
                return Err(Self::handle_error_response(response).await);
            }

            let body = response.text().await.map_err(StorageError::from_transport)?;
            parse_blob_list(&body)
        })
        .await
    }

    /// Blob count, byte total and per-migration-day counts for a container.
    pub async fn container_stats(
        &self,
        container: &str,
        prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> StorageResult<ContainerStats> {
        let blobs = self.list_blobs(container, prefix, cancel).await?;

        let mut stats = ContainerStats::default();
        for blob in &blobs {
            let day = blob.migrated_at().map(|at| at.format("%Y-%m-%d").to_string());
            stats.add_blob(blob.size, day);
        }
        Ok(stats)
    }

    /// Create the container if needed. Returns `true` if it was created.
    pub async fn ensure_container(&self, container: &str, cancel: &CancellationToken) -> StorageResult<bool> {
        let request = TokenRequest::new(TokenScope::container(container), TokenPermission::Create);

        let created = self
            .execute("ensure_container", request, cancel, |token| async move {
                let mut url = parse_url(&token.url)?;
                url.query_pairs_mut().append_pair("restype", "container");

                let response = self
                    .http
                    .put(url)
                    .header("x-ms-version", STORAGE_API_VERSION)
                    .header(reqwest::header::CONTENT_LENGTH, 0)
                    .send()
                    .await
                    .map_err(StorageError::from_transport)?;

                match response.status() {
                    s if s.is_success() => Ok(true),
                    StatusCode::CONFLICT => Ok(false),
                    _ => Err(Self::handle_error_response(response).await),
                }
            })
            .await?;

        if created {
            info!(container = %container, "Created container");
        }
        Ok(created)
    }

    /// Check the store with a one-item listing. Never fails.
    pub async fn test_connection(&self, container: &str) -> bool {
        let cancel = CancellationToken::new();
        match self.list_page(container, None, None, Some(1), &cancel).await {
            Ok(_) => true,
            Err(e) => {
                warn!(container = %container, "Storage connectivity check failed: {}", e);
                false
            }
        }
    }

    // =========================================================================
    // Request Pipeline
    // =========================================================================

    async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        request: TokenRequest,
        cancel: &CancellationToken,
        send: F,
    ) -> StorageResult<T>
    where
        F: Fn(SasToken) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let request_ref = &request;
        let send_ref = &send;

        let result = with_retry(&self.config.retry, operation, cancel, move |_| {
            self.attempt(operation, request_ref, cancel, send_ref)
        })
        .await;

        if matches!(result, Err(StorageError::Cancelled)) {
            self.tokens.invalidate(&request.scope, request.permission).await;
        }

        result
    }

    async fn attempt<T, F, Fut>(
        &self,
        operation: &'static str,
        request: &TokenRequest,
        cancel: &CancellationToken,
        send: &F,
    ) -> StorageResult<T>
    where
        F: Fn(SasToken) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                record_circuit_rejection(operation);
                debug!(operation = %operation, container = %request.scope.container, "Circuit open, rejecting call");
                return Err(e);
            }
        };

        let start = Instant::now();
        let timeout = self.config.timeout;
        let reached_storage = AtomicBool::new(false);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.send_with_refresh(operation, request, send, &reached_storage)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::Timeout(format!(
                        "{} exceeded {}ms",
                        operation,
                        timeout.as_millis()
                    ))),
                }
            }
        };

        // Broker failures say nothing about the storage endpoint.
        if result.is_err() && !reached_storage.load(Ordering::Acquire) {
            permit.abandon();
        } else {
            permit.record(&result);
        }

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);

        result
    }

    async fn send_with_refresh<T, F, Fut>(
        &self,
        operation: &'static str,
        request: &TokenRequest,
        send: &F,
        reached_storage: &AtomicBool,
    ) -> StorageResult<T>
    where
        F: Fn(SasToken) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let token = self.tokens.get_token(request).await?;
        reached_storage.store(true, Ordering::Release);

        match send(token).await {
            Err(e) if e.is_auth_expired() => {
                warn!(operation = %operation, container = %request.scope.container, "Access token rejected, refreshing once");
                self.tokens.invalidate(&request.scope, request.permission).await;
                let token = self.tokens.get_token(request).await?;
                send(token).await
            }
            other => other,
        }
    }

    async fn handle_error_response(response: Response) -> StorageError {
        let status = response.status().as_u16();
        let retry_after = header_string(response.headers(), RETRY_AFTER.as_str()).and_then(|v| parse_retry_after(&v));
        let body = response.text().await.unwrap_or_default();
        StorageError::from_http_status(status, retry_after, body)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_url(raw: &str) -> StorageResult<Url> {
    Url::parse(raw).map_err(|e| StorageError::invalid_response(format!("bad signed URL: {}", e)))
}

/// Signed URL with its query (the signature) removed.
pub fn durable_url(signed_url: &str) -> StorageResult<String> {
    let mut url = parse_url(signed_url)?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn metadata_from_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_HEADER_PREFIX)?;
            let raw = value.to_str().ok()?;
            Some((key.to_string(), percent_decode(raw.to_string())))
        })
        .collect()
}

#[derive(Debug, Default)]
struct ListPage {
    blobs: Vec<BlobInfo>,
    next_marker: Option<String>,
}

/// `List Blobs` response body.
#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: Blobs,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Blobs {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    #[serde(rename = "Name")]
    name: BlobName,
    #[serde(rename = "Properties", default)]
    properties: Properties,
    #[serde(rename = "Metadata", default)]
    metadata: BTreeMap<String, String>,
}

/// `<Name Encoded="true">` carries a percent-encoded name.
#[derive(Debug, Deserialize)]
struct BlobName {
    #[serde(rename = "@Encoded", default)]
    encoded: bool,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
}

impl From<BlobEntry> for BlobInfo {
    fn from(entry: BlobEntry) -> Self {
        let name = if entry.name.encoded {
            percent_decode(entry.name.value)
        } else {
            entry.name.value
        };

        Self {
            name,
            size: entry.properties.content_length.unwrap_or(0),
            last_modified: entry.properties.last_modified.as_deref().and_then(parse_http_date),
            metadata: entry
                .metadata
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), percent_decode(v)))
                .collect(),
        }
    }
}

fn percent_decode(value: String) -> String {
    match urlencoding::decode(&value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value,
    }
}

fn parse_blob_list(xml: &str) -> StorageResult<ListPage> {
    if !xml.contains("<EnumerationResults") {
        return Err(StorageError::invalid_response("listing is not a blob enumeration"));
    }

    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::invalid_response(format!("blob listing: {}", e)))?;

    Ok(ListPage {
        blobs: results.blobs.items.into_iter().map(BlobInfo::from).collect(),
        next_marker: results
            .next_marker
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="assets">
  <Blobs>
    <Blob>
      <Name>a-red-fox-2024.png</Name>
      <Properties>
        <Last-Modified>Wed, 01 May 2024 10:00:00 GMT</Last-Modified>
        <Content-Length>2048</Content-Length>
        <Content-Type>image/png</Content-Type>
      </Properties>
      <Metadata>
        <original_prompt>a%20red%20fox</original_prompt>
        <source>ai-generation-migration</source>
      </Metadata>
    </Blob>
    <Blob>
      <Name>tom &amp; jerry.jpg</Name>
      <Properties>
        <Content-Length>10</Content-Length>
      </Properties>
      <Metadata />
    </Blob>
  </Blobs>
  <NextMarker>page-2</NextMarker>
</EnumerationResults>"#;

    #[test]
    fn test_parse_blob_list() {
        let page = parse_blob_list(LISTING).unwrap();
        assert_eq!(page.blobs.len(), 2);

        let fox = &page.blobs[0];
        assert_eq!(fox.name, "a-red-fox-2024.png");
        assert_eq!(fox.size, 2048);
        assert_eq!(
            fox.last_modified.map(|d| d.format("%Y-%m-%d").to_string()).as_deref(),
            Some("2024-05-01")
        );
        assert_eq!(fox.metadata.get("original_prompt").map(String::as_str), Some("a red fox"));

        assert_eq!(page.blobs[1].name, "tom & jerry.jpg");
        assert!(page.blobs[1].metadata.is_empty());
        assert_eq!(page.next_marker.as_deref(), Some("page-2"));
    }

    const ESCAPED_LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="assets">
  <Prefix>2024</Prefix>
  <Blobs>
    <Blob>
      <Name>2024&#x2F;fox &amp; hound.png</Name>
      <Properties>
        <Content-Length>7</Content-Length>
      </Properties>
      <Metadata>
        <Original_Prompt><![CDATA[a <quoted> fox]]></Original_Prompt>
        <NextMarker>not-a-marker</NextMarker>
      </Metadata>
    </Blob>
    <Blob>
      <Name Encoded="true">caf%C3%A9.png</Name>
      <Properties>
        <Content-Length>3</Content-Length>
      </Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;

    #[test]
    fn test_parse_blob_list_escapes_and_metadata() {
        let page = parse_blob_list(ESCAPED_LISTING).unwrap();
        assert_eq!(page.blobs.len(), 2);

        let hound = &page.blobs[0];
        assert_eq!(hound.name, "2024/fox & hound.png");
        assert_eq!(hound.size, 7);
        assert!(hound.last_modified.is_none());
        assert_eq!(hound.metadata.get("original_prompt").map(String::as_str), Some("a <quoted> fox"));
        assert_eq!(hound.metadata.get("nextmarker").map(String::as_str), Some("not-a-marker"));

        assert_eq!(page.blobs[1].name, "caf\u{e9}.png");
        assert!(page.blobs[1].metadata.is_empty());

        // a marker inside blob metadata is not a continuation
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_parse_blob_list_empty_marker() {
        let page = parse_blob_list("<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>").unwrap();
        assert!(page.blobs.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_parse_blob_list_rejects_garbage() {
        assert!(parse_blob_list("{\"not\":\"xml\"}").is_err());
    }

    #[test]
    fn test_durable_url_strips_signature() {
        let url = durable_url("https://acct.blob.core.windows.net/assets/fox.png?sv=2023&sig=abc%3D").unwrap();
        assert_eq!(url, "https://acct.blob.core.windows.net/assets/fox.png");
    }

    #[test]
    fn test_account_authority() {
        let config = StorageConfig::new("http://127.0.0.1:10000/devstore", "http://localhost/mint");
        assert_eq!(config.account_authority().as_deref(), Some("127.0.0.1:10000"));

        let config = StorageConfig::new("https://acct.blob.core.windows.net", "http://localhost/mint");
        assert_eq!(config.account_authority().as_deref(), Some("acct.blob.core.windows.net"));
    }
}
