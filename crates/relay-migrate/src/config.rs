//! Migration configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

/// Whether new assets are migrated inline or by the background queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Await the migration and return the rewritten asset
    Sync,
    /// Return immediately and deliver the rewritten asset later
    #[default]
    Background,
}

impl MigrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationMode::Sync => "sync",
            MigrationMode::Background => "background",
        }
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MigrationMode {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(MigrationMode::Sync),
            "background" | "async" | "queue" => Ok(MigrationMode::Background),
            other => Err(MigrationError::config_error(format!("unknown migration mode: {}", other))),
        }
    }
}

/// Migration configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Destination container
    pub container: String,
    /// Maximum migrations in flight (queue admission gate and batch chunk size)
    pub max_concurrent: usize,
    /// Default handling for new assets
    pub mode: MigrationMode,
    /// Whether new assets are migrated at all
    pub auto_migration: bool,
    /// Per-call timeout for source downloads
    pub fetch_timeout: Duration,
    /// Hosts (`host` or `host:port`) whose unsigned URLs are already durable.
    /// Empty means "the storage account host".
    pub durable_hosts: Vec<String>,
    /// Host substrings that mark a provider's short-lived URLs
    pub ephemeral_hosts: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            container: "uxp-images".to_string(),
            max_concurrent: 3,
            mode: MigrationMode::Background,
            auto_migration: true,
            fetch_timeout: Duration::from_secs(30),
            durable_hosts: Vec::new(),
            ephemeral_hosts: crate::classify::DEFAULT_EPHEMERAL_HOSTS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl MigrationConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            container: std::env::var("RELAY_CONTAINER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.container),
            max_concurrent: std::env::var("RELAY_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent),
            mode: std::env::var("RELAY_MIGRATION_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.mode),
            auto_migration: std::env::var("RELAY_AUTO_MIGRATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auto_migration),
            fetch_timeout: Duration::from_secs(
                std::env::var("RELAY_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            durable_hosts: std::env::var("RELAY_DURABLE_HOSTS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.durable_hosts),
            ephemeral_hosts: std::env::var("RELAY_EPHEMERAL_HOSTS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.ephemeral_hosts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "RELAY_CONTAINER",
        "RELAY_MAX_CONCURRENT",
        "RELAY_MIGRATION_MODE",
        "RELAY_AUTO_MIGRATION",
        "RELAY_FETCH_TIMEOUT_SECS",
        "RELAY_DURABLE_HOSTS",
        "RELAY_EPHEMERAL_HOSTS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = MigrationConfig::from_env();
        assert_eq!(config.container, "uxp-images");
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.mode, MigrationMode::Background);
        assert!(config.auto_migration);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert!(config.durable_hosts.is_empty());
        assert!(config.ephemeral_hosts.iter().any(|h| h == "adobe.com"));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("RELAY_CONTAINER", "assets");
        std::env::set_var("RELAY_MAX_CONCURRENT", "0");
        std::env::set_var("RELAY_MIGRATION_MODE", "sync");
        std::env::set_var("RELAY_AUTO_MIGRATION", "false");
        std::env::set_var("RELAY_DURABLE_HOSTS", "store.example, CDN.example:8443 ,");

        let config = MigrationConfig::from_env();
        assert_eq!(config.container, "assets");
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.mode, MigrationMode::Sync);
        assert!(!config.auto_migration);
        assert_eq!(config.durable_hosts, vec!["store.example", "cdn.example:8443"]);

        clear_env();
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Background".parse::<MigrationMode>().unwrap(), MigrationMode::Background);
        assert_eq!("sync".parse::<MigrationMode>().unwrap(), MigrationMode::Sync);
        assert!("later".parse::<MigrationMode>().is_err());
    }
}
