//! Per-scope token caching.
//!
//! - One entry per (container, blob, permission)
//! - Refresh margin so a token never expires mid-transfer
//! - Entries are dropped on auth failure or cancellation

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StorageResult;
use crate::token::{SasToken, TokenBroker, TokenPermission, TokenRequest, TokenScope};

/// Refresh margin: tokens are not handed out within 60 seconds of expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

type TokenKey = (String, Option<String>, TokenPermission);

fn key_for(scope: &TokenScope, permission: TokenPermission) -> TokenKey {
    (scope.container.clone(), scope.blob.clone(), permission)
}

/// Cache in front of a [`TokenBroker`].
pub struct TokenCache {
    broker: Arc<dyn TokenBroker>,
    entries: RwLock<HashMap<TokenKey, SasToken>>,
    refresh_margin: Duration,
}

impl TokenCache {
    pub fn new(broker: Arc<dyn TokenBroker>) -> Self {
        Self {
            broker,
            entries: RwLock::new(HashMap::new()),
            refresh_margin: Duration::seconds(TOKEN_REFRESH_MARGIN_SECS),
        }
    }

    fn is_fresh(&self, token: &SasToken) -> bool {
        Utc::now() + self.refresh_margin < token.expires_at
    }

    /// Get a token for `request`, minting a new one when the cached entry is
    /// missing or inside the refresh margin.
    pub async fn get_token(&self, request: &TokenRequest) -> StorageResult<SasToken> {
        let key = key_for(&request.scope, request.permission);

        // Fast path
        {
            let entries = self.entries.read().await;
            if let Some(token) = entries.get(&key) {
                if self.is_fresh(token) {
                    return Ok(token.clone());
                }
            }
        }

        let token = self.broker.request_token(request).await?;

        let mut entries = self.entries.write().await;
        if self.is_fresh(&token) {
            entries.insert(key, token.clone());
        } else {
            // too short-lived to share; good for this one call only
            entries.remove(&key);
        }
        debug!(
            container = %request.scope.container,
            permission = request.permission.as_sas_str(),
            expires_at = %token.expires_at,
            "Minted access token"
        );

        Ok(token)
    }

    /// Drop the cached token for a scope.
    pub async fn invalidate(&self, scope: &TokenScope, permission: TokenPermission) {
        let mut entries = self.entries.write().await;
        entries.remove(&key_for(scope, permission));
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
