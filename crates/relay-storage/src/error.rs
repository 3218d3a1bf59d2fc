//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to the token broker or the object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transient network failure: {0}")]
    Transient(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Access token expired or rejected: {0}")]
    AuthExpired(String),

    #[error("Circuit breaker is open, failing fast")]
    CircuitOpen,

    #[error("Request rejected ({0}): {1}")]
    PermanentClient(u16, String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Token request failed: {0}")]
    TokenRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn token_request(msg: impl Into<String>) -> Self {
        Self::TokenRequest(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map a non-success HTTP status into the error taxonomy.
    ///
    /// `retry_after_ms` is only used for 429 responses.
    pub fn from_http_status(status: u16, retry_after_ms: Option<u64>, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 => Self::AuthExpired(body),
            403 if is_auth_failure_body(&body) => Self::AuthExpired(body),
            404 => Self::NotFound(body),
            408 => Self::Timeout(format!("server returned 408: {}", body)),
            429 => Self::RateLimited { retry_after_ms },
            500..=599 => Self::Server(status, body),
            _ => Self::PermanentClient(status, body),
        }
    }

    /// Classify a transport error, pulling timeouts out of the generic bucket.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err)
        }
    }

    /// Check if error is retryable under the backoff policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Network(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
            }
            StorageError::Transient(_)
            | StorageError::Timeout(_)
            | StorageError::RateLimited { .. }
            | StorageError::Server(..) => true,
            _ => false,
        }
    }

    /// Server-requested wait before the next attempt.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            StorageError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StorageError::Network(e) => e.status().map(|s| s.as_u16()),
            StorageError::RateLimited { .. } => Some(429),
            StorageError::Server(status, _) | StorageError::PermanentClient(status, _) => Some(*status),
            StorageError::AuthExpired(_) => Some(401),
            StorageError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, StorageError::AuthExpired(_))
    }

    /// Raised before any request reached the storage endpoint.
    pub fn is_pre_request(&self) -> bool {
        matches!(
            self,
            StorageError::Cancelled | StorageError::TokenRequest(_) | StorageError::CircuitOpen | StorageError::Config(_)
        )
    }

    /// Whether the error says something about the health of the storage endpoint.
    ///
    /// Client-side rejections and pre-request failures leave the circuit
    /// breaker untouched.
    pub fn counts_as_breaker_failure(&self) -> bool {
        !self.is_pre_request() && !matches!(self, StorageError::PermanentClient(..) | StorageError::NotFound(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Network(_) | StorageError::Transient(_) => "network",
            StorageError::Timeout(_) => "timeout",
            StorageError::RateLimited { .. } => "rate_limited",
            StorageError::Server(..) => "server",
            StorageError::AuthExpired(_) => "auth_expired",
            StorageError::CircuitOpen => "circuit_open",
            StorageError::PermanentClient(..) => "client",
            StorageError::NotFound(_) => "not_found",
            StorageError::TokenRequest(_) => "token",
            StorageError::Cancelled => "cancelled",
            StorageError::Config(_) => "config",
            StorageError::InvalidResponse(_) | StorageError::Json(_) => "invalid_response",
        }
    }
}

/// 403 bodies that mean "your token is no good" rather than "you may not do this".
fn is_auth_failure_body(body: &str) -> bool {
    body.contains("AuthenticationFailed")
        || body.contains("AuthorizationFailure")
        || body.contains("Signature not valid")
        || body.contains("Signed expiry time")
        || body.to_ascii_lowercase().contains("expired")
}

/// Parse a `Retry-After` header value (delta-seconds or HTTP date) into milliseconds.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs.saturating_mul(1000));
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.num_milliseconds().max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_mapping() {
        assert!(StorageError::from_http_status(401, None, "").is_auth_expired());
        assert!(StorageError::from_http_status(
            403,
            None,
            "<Code>AuthenticationFailed</Code><Message>Signed expiry time has passed</Message>"
        )
        .is_auth_expired());

        let denied = StorageError::from_http_status(403, None, "<Code>AuthorizationPermissionMismatch</Code>");
        assert!(matches!(denied, StorageError::PermanentClient(403, _)));
        assert!(!denied.is_retryable());
    }

    #[test]
    fn test_retry_after_parse() {
        assert_eq!(parse_retry_after("2"), Some(2000));
        assert_eq!(parse_retry_after(" 0 "), Some(0));
        assert_eq!(parse_retry_after("Mon, 01 Jan 2001 00:00:00 GMT"), Some(0));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_breaker_failure_classification() {
        assert!(StorageError::Server(503, String::new()).counts_as_breaker_failure());
        assert!(StorageError::Timeout("slow".into()).counts_as_breaker_failure());
        assert!(!StorageError::PermanentClient(400, String::new()).counts_as_breaker_failure());
        assert!(!StorageError::Cancelled.counts_as_breaker_failure());
        assert!(!StorageError::CircuitOpen.counts_as_breaker_failure());
        assert!(!StorageError::TokenRequest("denied (400)".into()).counts_as_breaker_failure());
        assert!(StorageError::TokenRequest(String::new()).is_pre_request());
        assert!(!StorageError::Server(500, String::new()).is_pre_request());
    }
}
