//! Scoped, short-lived access tokens.
//!
//! The broker asks a trusted backend to sign a URL for one container or
//! blob. Account secrets never reach this process.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

const DEFAULT_TTL_MINUTES: u32 = 15;
const DEFAULT_MAX_TTL_MINUTES: u32 = 60;
const MAX_BLOB_NAME_LEN: usize = 1024;
const FORBIDDEN_BLOB_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// What a token allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPermission {
    Read,
    Write,
    Delete,
    List,
    Create,
}

impl TokenPermission {
    /// Storage permission letters sent on the wire.
    pub fn as_sas_str(&self) -> &'static str {
        match self {
            TokenPermission::Read => "r",
            TokenPermission::Write => "cw",
            TokenPermission::Delete => "d",
            TokenPermission::List => "l",
            TokenPermission::Create => "c",
        }
    }
}

/// Container, optionally narrowed to a single blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenScope {
    pub container: String,
    pub blob: Option<String>,
}

impl TokenScope {
    pub fn container(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: None,
        }
    }

    pub fn blob(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: Some(blob.into()),
        }
    }
}

/// A token request. `ttl_minutes = None` uses the broker default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRequest {
    pub scope: TokenScope,
    pub permission: TokenPermission,
    pub ttl_minutes: Option<u32>,
}

impl TokenRequest {
    pub fn new(scope: TokenScope, permission: TokenPermission) -> Self {
        Self {
            scope,
            permission,
            ttl_minutes: None,
        }
    }
}

/// Signed URL plus its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub permission: TokenPermission,
    pub scope: TokenScope,
}

impl SasToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Issues scoped tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Request a token. Backend rejections are [`StorageError::TokenRequest`];
    /// transport failures surface as-is so the caller's retry policy applies.
    async fn request_token(&self, request: &TokenRequest) -> StorageResult<SasToken>;
}

/// Container names: 3-63 chars, lowercase alphanumerics and hyphens,
/// alphanumeric at both ends.
pub fn validate_container_name(name: &str) -> StorageResult<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_ends = name
        .chars()
        .next()
        .zip(name.chars().last())
        .map(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric())
        .unwrap_or(false);

    if (3..=63).contains(&name.len()) && valid_chars && valid_ends {
        Ok(())
    } else {
        Err(StorageError::token_request(format!("invalid container name: {:?}", name)))
    }
}

/// Blob names: 1-1024 chars, none of `<>:"|?*`.
pub fn validate_blob_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.chars().count() > MAX_BLOB_NAME_LEN {
        return Err(StorageError::token_request(format!(
            "blob name must be 1-{} characters",
            MAX_BLOB_NAME_LEN
        )));
    }
    if name.contains(FORBIDDEN_BLOB_CHARS) {
        return Err(StorageError::token_request(format!("invalid blob name: {:?}", name)));
    }
    Ok(())
}

// =============================================================================
// HTTP broker
// =============================================================================

/// Token broker configuration.
#[derive(Debug, Clone)]
pub struct TokenBrokerConfig {
    /// Token-minting endpoint
    pub endpoint: String,
    /// TTL used when a request does not ask for one
    pub default_ttl_minutes: u32,
    /// Upper bound for any requested TTL
    pub max_ttl_minutes: u32,
    /// Request timeout
    pub timeout: Duration,
}

impl TokenBrokerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            default_ttl_minutes: DEFAULT_TTL_MINUTES,
            max_ttl_minutes: DEFAULT_MAX_TTL_MINUTES,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let endpoint = std::env::var("RELAY_TOKEN_ENDPOINT")
            .map_err(|_| StorageError::config_error("RELAY_TOKEN_ENDPOINT not set"))?;

        if endpoint.is_empty() {
            return Err(StorageError::config_error("RELAY_TOKEN_ENDPOINT cannot be empty"));
        }

        let default_ttl_minutes: u32 = std::env::var("RELAY_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TTL_MINUTES);

        let max_ttl_minutes: u32 = std::env::var("RELAY_TOKEN_MAX_TTL_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_TTL_MINUTES);

        let timeout_secs: u64 = std::env::var("RELAY_STORAGE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            endpoint,
            default_ttl_minutes,
            max_ttl_minutes,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Requested TTL clamped to `[1, max_ttl_minutes]`.
    pub fn effective_ttl(&self, requested: Option<u32>) -> u32 {
        let max = self.max_ttl_minutes.max(1);
        requested.unwrap_or(self.default_ttl_minutes).clamp(1, max)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest<'a> {
    container: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    blob_name: Option<&'a str>,
    perms: &'static str,
    ttl_minutes: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MintResponse {
    url: String,
    expires_on: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MintErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Broker backed by an HTTP token-minting endpoint.
#[derive(Clone)]
pub struct HttpTokenBroker {
    http: Client,
    config: TokenBrokerConfig,
}

impl HttpTokenBroker {
    pub fn new(config: TokenBrokerConfig) -> StorageResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("relay-storage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StorageError::Network)?;
        Ok(Self { http, config })
    }

    pub fn with_client(http: Client, config: TokenBrokerConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &TokenBrokerConfig {
        &self.config
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn request_token(&self, request: &TokenRequest) -> StorageResult<SasToken> {
        validate_container_name(&request.scope.container)?;
        if let Some(blob) = &request.scope.blob {
            validate_blob_name(blob)?;
        }

        let ttl_minutes = self.config.effective_ttl(request.ttl_minutes);
        let body = MintRequest {
            container: &request.scope.container,
            blob_name: request.scope.blob.as_deref(),
            perms: request.permission.as_sas_str(),
            ttl_minutes,
        };

        debug!(
            container = %request.scope.container,
            blob_name = ?request.scope.blob,
            perms = body.perms,
            ttl_minutes,
            "Requesting access token"
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(StorageError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<MintErrorBody>(&text) {
                Ok(err) => match err.details {
                    Some(details) => format!("{}: {}", err.error, details),
                    None => err.error,
                },
                Err(_) => text,
            };
            warn!(status = status.as_u16(), "Token endpoint rejected request: {}", reason);
            return Err(StorageError::token_request(format!("{} ({})", reason, status.as_u16())));
        }

        let minted: MintResponse = response
            .json()
            .await
            .map_err(|e| StorageError::invalid_response(format!("token response: {}", e)))?;

        Ok(SasToken {
            url: minted.url,
            expires_at: minted.expires_on,
            permission: request.permission,
            scope: request.scope.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_permission_letters() {
        assert_eq!(TokenPermission::Write.as_sas_str(), "cw");
        assert_eq!(TokenPermission::Read.as_sas_str(), "r");
        assert_eq!(TokenPermission::List.as_sas_str(), "l");
    }

    #[test]
    fn test_container_validation() {
        assert!(validate_container_name("assets").is_ok());
        assert!(validate_container_name("uxp-images-2").is_ok());
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name("-assets").is_err());
        assert!(validate_container_name("assets-").is_err());
        assert!(validate_container_name("Assets").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_blob_validation() {
        assert!(validate_blob_name("a-red-fox-2024.png").is_ok());
        assert!(validate_blob_name("folder/nested.png").is_ok());
        assert!(validate_blob_name("").is_err());
        assert!(validate_blob_name("what?.png").is_err());
        assert!(validate_blob_name(&"a".repeat(1025)).is_err());
    }

    #[test]
    fn test_ttl_clamp() {
        let config = TokenBrokerConfig::new("http://localhost");
        assert_eq!(config.effective_ttl(None), 15);
        assert_eq!(config.effective_ttl(Some(0)), 1);
        assert_eq!(config.effective_ttl(Some(500)), 60);
    }

    #[tokio::test]
    async fn test_http_broker_mints_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mint"))
            .and(body_json(serde_json::json!({
                "container": "assets",
                "blobName": "fox.png",
                "perms": "cw",
                "ttlMinutes": 60
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://store.example/assets/fox.png?sig=abc",
                "expiresOn": "2030-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let broker = HttpTokenBroker::new(TokenBrokerConfig::new(format!("{}/mint", server.uri()))).unwrap();
        let mut request = TokenRequest::new(TokenScope::blob("assets", "fox.png"), TokenPermission::Write);
        request.ttl_minutes = Some(240);

        let token = broker.request_token(&request).await.unwrap();
        assert_eq!(token.url, "https://store.example/assets/fox.png?sig=abc");
        assert_eq!(token.permission, TokenPermission::Write);
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_http_broker_rejection_is_token_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": "Failed to generate SAS token",
                "details": "signing key unavailable"
            })))
            .mount(&server)
            .await;

        let broker = HttpTokenBroker::new(TokenBrokerConfig::new(server.uri())).unwrap();
        let request = TokenRequest::new(TokenScope::container("assets"), TokenPermission::List);

        let err = broker.request_token(&request).await.unwrap_err();
        assert!(matches!(err, StorageError::TokenRequest(ref msg) if msg.contains("signing key")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_names_never_hit_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let broker = HttpTokenBroker::new(TokenBrokerConfig::new(server.uri())).unwrap();
        let request = TokenRequest::new(TokenScope::blob("Bad_Container", "x.png"), TokenPermission::Write);

        assert!(matches!(
            broker.request_token(&request).await,
            Err(StorageError::TokenRequest(_))
        ));
    }
}
