//! Chipsettle dry-run binary
//!
//! Loads the configuration, opens the ledger database and runs the settlement
//! pipelines against the in-memory chain until Ctrl-C. Deployments against a
//! real contract embed the library and hand `Daemon::start` their own
//! `ContractClient`.

use chipsettle::{
    common::config::{generate_sample_config, ConfigLoader},
    Daemon, MockContract, RocksRepository,
};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chipsettle")]
#[command(about = "Dry run of the provably-fair settlement pipelines on an in-memory chain", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// Prefix of environment overrides
    #[arg(long, default_value = "CHIPSETTLE")]
    env_prefix: String,

    /// Write a sample configuration to this path and exit
    #[arg(long)]
    sample_config: Option<String>,

    /// Genesis block of the in-memory chain
    #[arg(long, default_value = "1")]
    genesis: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(path) = args.sample_config {
        generate_sample_config(&path)?;
        println!("Sample configuration written to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new().with_env_prefix(&args.env_prefix);
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_filter)),
        )
        .init();

    info!(data_directory = %config.storage.data_directory, "opening ledger database");
    let repo = Arc::new(RocksRepository::open(
        &config.storage.data_directory,
        config.storage.clear_on_start,
    )?);

    info!(
        contract = %config.chain.contract_address,
        genesis = args.genesis,
        "dry run against the in-memory chain"
    );
    let chain = MockContract::new(&config.chain.contract_address, args.genesis);

    let daemon = Daemon::start(config, chain, repo).await?;
    info!("settlement pipelines running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    if daemon.config().monitoring.enable_metrics {
        info!(metrics = %daemon.render_metrics(), "final metrics");
    }
    daemon.shutdown().await?;
    Ok(())
}
