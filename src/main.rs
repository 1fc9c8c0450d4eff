use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oracle_anchor::anchor::{Anchor, FileLedger};
use oracle_anchor::config::{AppConfig, LoggingConfig};
use oracle_anchor::evidence::is_hash_prefix;
use oracle_anchor::scheduler::{StaticCollector, TickScheduler};
use oracle_anchor::store::{BundleStore, FileBundleStore};
use oracle_anchor::tick::OracleService;
use oracle_anchor::types::ProviderObservation;
use oracle_anchor::verifier::{VerificationStatus, Verifier};

#[derive(Parser)]
#[command(name = "oracle-anchor", version, about = "Attested price index with on-chain anchoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single tick over observations read from a JSON file
    Tick {
        #[arg(long)]
        observations: PathBuf,
        /// Defaults to the current time (RFC 3339, seconds)
        #[arg(long)]
        tick_id: Option<String>,
    },
    /// Run the periodic tick loop, replaying observations from a JSON file, until Ctrl-C
    Run {
        #[arg(long)]
        observations: PathBuf,
    },
    /// Verify the commitment carried by a ledger transaction
    Verify {
        tx_id: String,
        #[arg(long)]
        network: Option<String>,
    },
    /// Print the latest pointer
    Latest,
    /// Print a stored bundle by hash prefix
    Bundle { prefix: String },
    /// Print the effective configuration digest
    Config,
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn read_observations(path: &PathBuf) -> Result<Vec<ProviderObservation>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read observations from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse observations in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

struct Components {
    ledger: Arc<FileLedger>,
    store: Arc<FileBundleStore>,
}

fn open_components(config: &AppConfig) -> Result<Components> {
    let store = FileBundleStore::new(&config.persistence.data_dir)
        .context("Failed to open bundle store")?;
    let ledger = FileLedger::new(&config.anchor.ledger_path, config.anchor.max_payload_bytes);
    Ok(Components {
        ledger: Arc::new(ledger),
        store: Arc::new(store),
    })
}

fn build_service(config: &AppConfig, components: &Components) -> OracleService {
    let anchor: Option<Arc<dyn Anchor>> = if config.anchor.enabled {
        Some(components.ledger.clone())
    } else {
        None
    };
    OracleService::new(config.tick_config(), anchor, components.store.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    for warning in config.validate()? {
        warn!("{}", warning);
    }
    info!(config = %config.digest(), "Configuration loaded");

    let components = open_components(&config)?;

    match cli.command {
        Commands::Tick {
            observations,
            tick_id,
        } => {
            let observations = read_observations(&observations)?;
            let service = build_service(&config, &components);
            let tick_id = tick_id
                .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
            let report = service.run_tick(&tick_id, observations).await;
            print_json(&report)?;
            if report.assets.iter().any(|a| !a.stored) {
                bail!("one or more bundles could not be stored");
            }
        }
        Commands::Run { observations } => {
            let collector = Arc::new(StaticCollector::new(read_observations(&observations)?));
            let service = Arc::new(build_service(&config, &components));
            let scheduler = TickScheduler::from_config(&config.collector());
            let handle = scheduler.start(collector, service.clone());

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested, finishing in-flight tick");
            handle.stop().await?;
            print_json(&service.state().await)?;
        }
        Commands::Verify { tx_id, network } => {
            let network = network.unwrap_or_else(|| config.oracle.network.clone());
            let verifier = Verifier::new(
                config.oracle.network.clone(),
                components.ledger.clone(),
                components.store.clone(),
                Duration::from_millis(config.verifier.fetch_timeout_ms),
            );
            let result = verifier.verify(&tx_id, &network).await;
            print_json(&result)?;
            if result.status != VerificationStatus::Passed {
                std::process::exit(match result.status {
                    VerificationStatus::Partial => 2,
                    VerificationStatus::Failed => 3,
                    _ => 4,
                });
            }
        }
        Commands::Latest => match components.store.latest_pointer().await? {
            Some(pointer) => print_json(&pointer)?,
            None => bail!("no bundle has been stored yet"),
        },
        Commands::Bundle { prefix } => {
            if !is_hash_prefix(&prefix) {
                bail!("bundle prefix must be 16 lowercase hex characters");
            }
            match components.store.get(&prefix).await? {
                Some(stored) => print_json(&stored)?,
                None => bail!("bundle {} not found", prefix),
            }
        }
        Commands::Config => println!("{}", config),
    }

    Ok(())
}
