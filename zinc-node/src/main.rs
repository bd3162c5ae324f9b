//! Zinc Node - validator process running consensus and liveness loops

mod http;

use anyhow::Context;
use clap::{Parser, Subcommand};
use http::{HttpBroadcaster, HttpProbe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn, Level};
use zinc_consensus::{
    ChainConfig, JsonFileStore, LedgerService, Scheduler, Secp256k1Verifier, SystemClock,
    ValidatorRegistry,
};

#[derive(Parser)]
#[command(name = "zinc-node")]
#[command(about = "Zinc Node - proof-of-stake validator")]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start the node daemon
    Start {
        /// Address this node announces blocks as
        #[arg(long)]
        address: String,
    },

    /// Manage the validator snapshot
    Validators {
        #[command(subcommand)]
        command: ValidatorCommands,
    },
}

#[derive(Subcommand)]
enum ValidatorCommands {
    /// List registered validators
    List,

    /// Register a validator or raise its stake
    Add {
        address: String,
        stake: i64,
        endpoint: String,
    },

    /// Remove a validator
    Remove { address: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(ChainConfig::default_config_file);

    match cli.command {
        Commands::Init { force } => init_node(&config_path, force),
        Commands::Start { address } => start_node(&config_path, address).await,
        Commands::Validators { command } => handle_validator_command(&config_path, command).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<ChainConfig> {
    let config = if path.exists() {
        ChainConfig::from_file(path)?
    } else {
        warn!("No configuration at {}, using defaults", path.display());
        ChainConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn init_node(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    ChainConfig::default()
        .save_to_file(path)
        .with_context(|| format!("writing {}", path.display()))?;

    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn start_node(config_path: &Path, address: String) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let scheduler_settings = config.scheduler.clone();

    let broadcaster = HttpBroadcaster::new(
        address.clone(),
        Duration::from_secs(scheduler_settings.broadcast_timeout_secs),
    )?;
    let probe = HttpProbe::new(Duration::from_secs(scheduler_settings.probe_timeout_secs))?;

    let store = JsonFileStore::new(config.registry.path.clone());
    let service = Arc::new(LedgerService::new(
        config,
        store,
        Arc::new(Secp256k1Verifier::new()),
        Arc::new(broadcaster),
        Arc::new(SystemClock),
    )?);

    info!("Starting Zinc node as {}", address);
    info!(
        "Chain height {}, {} validators registered",
        service.ledger().chain_len().await,
        service.registry().count().await?
    );

    let handle = Scheduler::new(service, Arc::new(probe)).start();

    info!("Node started, press Ctrl+C to stop");
    signal::ctrl_c().await?;
    info!("Shutting down node...");
    handle.shutdown().await;

    Ok(())
}

async fn handle_validator_command(config_path: &Path, command: ValidatorCommands) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let registry = ValidatorRegistry::new(JsonFileStore::new(config.registry.path.clone()));

    match command {
        ValidatorCommands::List => {
            for validator in registry.snapshot().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    validator.address,
                    validator.stake,
                    validator.api_endpoint,
                    if validator.active { "active" } else { "inactive" }
                );
            }
        }
        ValidatorCommands::Add { address, stake, endpoint } => {
            let accepted = registry
                .register_or_update(&address, stake, &endpoint, config.registry.min_stake)
                .await?;
            if !accepted {
                anyhow::bail!(
                    "stake {} is below the minimum of {}",
                    stake,
                    config.registry.min_stake
                );
            }
            println!("Validator {} registered", address);
        }
        ValidatorCommands::Remove { address } => {
            if !registry.remove(&address).await? {
                anyhow::bail!("validator {} not found", address);
            }
            println!("Validator {} removed", address);
        }
    }

    Ok(())
}
