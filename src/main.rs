//! Omni Connector CLI
//!
//! Inspect wallet manifests and connector configuration.

use clap::{Parser, Subcommand};
use omni_connector::manifest::validate_debug_manifest;
use omni_connector::{ConnectorBuilder, ConnectorConfig, Network, Result};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "omni-connector")]
#[command(about = "Manifest-driven NEAR wallet connector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the wallet manifest and list the wallets it registers
    Wallets {
        /// Network (mainnet, testnet)
        #[arg(short, long)]
        network: Option<String>,

        /// Wallet ids to leave out (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Check a debug wallet manifest
    Validate {
        /// Path to the manifest JSON
        file: PathBuf,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => ConnectorConfig::from_file(path)?,
        None => ConnectorConfig::default(),
    };

    match cli.command {
        Commands::Wallets { network, exclude } => {
            run_wallets(config, network, exclude).await?;
        }
        Commands::Validate { file } => {
            run_validate(file)?;
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_wallets(
    mut config: ConnectorConfig,
    network: Option<String>,
    exclude: Vec<String>,
) -> Result<()> {
    if let Some(network) = network {
        config.network = network.parse::<Network>()?;
    }
    config.excluded_wallets.extend(exclude);

    tracing::info!(
        network = %config.network,
        excluded = ?config.excluded_wallets,
        "Loading wallet manifest"
    );

    let connector = ConnectorBuilder::new(config).build().await?;
    connector.when_ready().await;

    let manifest = connector.manifest();
    let available: Vec<String> = connector
        .available_wallets()
        .into_iter()
        .map(|wallet| wallet.id)
        .collect();
    let report = json!({
        "network": connector.network(),
        "manifest_version": manifest.version,
        "wallets": connector.wallets(),
        "available": available,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_validate(file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .map_err(|e| omni_connector::Error::Config(format!("{}: {}", file.display(), e)))?;
    let raw: serde_json::Value = serde_json::from_str(&content)?;

    let manifest = validate_debug_manifest(&raw)?;
    tracing::info!(wallet_id = %manifest.id, "Manifest is valid");
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}
