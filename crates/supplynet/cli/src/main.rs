//! supplynet - command-line access to the fulfillment and traceability engine
//!
//! One process per command. With the in-memory backend the ledger can be
//! seeded from, and persisted back to, a JSON snapshot file.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use supplynet_engine::{EngineConfig, FulfillmentService, StaticSupplierDirectory};
use supplynet_ledger::{InMemoryLedger, LedgerReader, LedgerSnapshot, LedgerStore};
use supplynet_types::{ActorId, CompanyId};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::Commands;
use config::{CliConfig, StorageConfig};

/// supplynet CLI
#[derive(Parser)]
#[command(name = "supplynet")]
#[command(about = "Network fulfillment & traceability engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SUPPLYNET_CONFIG")]
    config: Option<String>,

    /// Acting user recorded on every mutation
    #[arg(short, long, env = "SUPPLYNET_ACTOR", default_value = "cli")]
    actor: String,

    /// Supplier relationships offered as chain targets: `buyer=supplier`
    #[arg(long = "supplier", value_parser = parse_supplier)]
    suppliers: Vec<(CompanyId, CompanyId)>,

    /// Log level (overrides config)
    #[arg(long, env = "SUPPLYNET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SUPPLYNET_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    // Logs go to stderr so command output stays parseable.
    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let directory = cli
        .suppliers
        .iter()
        .cloned()
        .fold(StaticSupplierDirectory::new(), |dir, (buyer, supplier)| {
            dir.with_supplier(buyer, supplier)
        });
    let actor = ActorId::new(cli.actor);

    match config.storage {
        StorageConfig::Memory { seed, persist } => {
            let ledger = match &seed {
                Some(path) if path.exists() => {
                    Arc::new(InMemoryLedger::from_snapshot(read_snapshot(path)?))
                }
                _ => Arc::new(InMemoryLedger::new()),
            };
            let mutates = cli.command.mutates();
            run(ledger.clone(), directory, config.engine, cli.command, &actor).await?;

            if let (true, true, Some(path)) = (persist, mutates, seed.as_deref()) {
                write_snapshot(path, &ledger.snapshot().await?)?;
                info!(path = %path.display(), "ledger snapshot persisted");
            }
            Ok(())
        }
        #[cfg(feature = "postgres")]
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let ledger = supplynet_ledger::postgres::PostgresLedger::connect_with_options(
                &url,
                max_connections,
                connect_timeout_secs,
            )
            .await?;
            run(Arc::new(ledger), directory, config.engine, cli.command, &actor).await
        }
        #[cfg(not(feature = "postgres"))]
        StorageConfig::Postgres { .. } => {
            anyhow::bail!("postgres storage requires building with the `postgres` feature")
        }
    }
}

async fn run<S: LedgerStore + 'static>(
    store: Arc<S>,
    directory: StaticSupplierDirectory,
    engine: EngineConfig,
    command: Commands,
    actor: &ActorId,
) -> anyhow::Result<()> {
    let service = FulfillmentService::new(store, Arc::new(directory), engine);
    commands::execute(command, &service, actor).await
}

fn read_snapshot(path: &Path) -> anyhow::Result<LedgerSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid snapshot {}", path.display()))
}

fn write_snapshot(path: &Path, snapshot: &LedgerSnapshot) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

fn parse_supplier(raw: &str) -> Result<(CompanyId, CompanyId), String> {
    let (buyer, supplier) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected buyer=supplier, got `{raw}`"))?;
    if buyer.is_empty() || supplier.is_empty() {
        return Err(format!("expected buyer=supplier, got `{raw}`"));
    }
    Ok((CompanyId::new(buyer), CompanyId::new(supplier)))
}
