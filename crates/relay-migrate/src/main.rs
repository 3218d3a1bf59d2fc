//! Migration command-line tool.
//!
//! ```text
//! relay-migrate [--metrics] migrate <assets.json>
//! relay-migrate [--metrics] check
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_migrate::metrics::init_metrics;
use relay_migrate::MigrationContext;
use relay_models::MediaAsset;

const USAGE: &str = "usage: relay-migrate [--metrics] <migrate <assets.json> | check>";

enum Command {
    Migrate(PathBuf),
    Check,
}

struct Args {
    command: Command,
    metrics: bool,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut metrics = false;
    let mut positional = Vec::new();
    for arg in raw {
        match arg.as_str() {
            "--metrics" => metrics = true,
            "-h" | "--help" => bail!(USAGE),
            _ => positional.push(arg),
        }
    }

    let command = match positional.as_slice() {
        [cmd, path] if cmd == "migrate" => Command::Migrate(PathBuf::from(path)),
        [cmd] if cmd == "check" => Command::Check,
        _ => bail!(USAGE),
    };
    Ok(Args { command, metrics })
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_migrate=info,relay_storage=info,warn"));

    // Logs go to stderr so stdout stays machine-readable.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let metrics = if args.metrics {
        match init_metrics() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to install metrics recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let outcome = run(args.command).await;
    print_metrics(metrics.as_ref());

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn print_metrics(handle: Option<&PrometheusHandle>) {
    if let Some(handle) = handle {
        eprintln!("{}", handle.render());
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let context = MigrationContext::from_env(None).context("failed to build migration context")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_cancel.cancel();
        }
    });

    let result = match command {
        Command::Migrate(path) => migrate(&context, &path, &cancel).await,
        Command::Check => check(&context).await,
    };

    context.shutdown().await;
    result
}

async fn migrate(context: &MigrationContext, path: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let assets: Vec<MediaAsset> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON array of assets", path.display()))?;

    info!(count = assets.len(), path = %path.display(), "Migrating assets");

    let integration = context.integration();
    integration.initialize(cancel).await;

    let (updated, result) = integration.migrate_existing_assets(assets, cancel).await;
    println!("{}", serde_json::to_string_pretty(&updated)?);

    info!(
        total = result.total,
        succeeded = result.success_count,
        failed = result.failure_count,
        skipped = result.skipped_count,
        bytes = result.total_bytes(),
        elapsed_ms = result.elapsed_ms,
        "Migration run finished"
    );

    if cancel.is_cancelled() {
        return Err(anyhow!("migration interrupted"));
    }
    Ok(())
}

async fn check(context: &MigrationContext) -> anyhow::Result<()> {
    let reachable = context.test_connection().await;
    println!("{}", serde_json::to_string_pretty(&context.health())?);

    if !reachable {
        bail!("storage account is not reachable");
    }
    info!("Storage connection ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_migrate() {
        let parsed = args(&["--metrics", "migrate", "assets.json"]).unwrap();
        assert!(parsed.metrics);
        assert!(matches!(parsed.command, Command::Migrate(ref p) if p == &PathBuf::from("assets.json")));
    }

    #[test]
    fn test_parse_check() {
        let parsed = args(&["check"]).unwrap();
        assert!(!parsed.metrics);
        assert!(matches!(parsed.command, Command::Check));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(args(&[]).is_err());
        assert!(args(&["migrate"]).is_err());
        assert!(args(&["upload", "x"]).is_err());
    }
}
