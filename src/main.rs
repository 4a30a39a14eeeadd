use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use trickled::bootstrap::Server;
use trickled::config::Config;
use trickled::telemetry::{init_tracing, shutdown_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "trickled")]
#[command(author, version, about = "Durable trickle scheduler for SMS batches")]
struct Args {
    /// Path to config file (defaults are used when absent)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    init_tracing(&TracingConfig::from(&config.telemetry))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "starting trickled"
    );

    info!(
        backend = ?config.store.backend,
        shards = config.router.shards,
        admin = %config.admin.address,
        "configuration loaded"
    );

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    // Create and run server
    let server = Server::new(config)?;
    let result = server.run().await;

    shutdown_tracing();
    result
}
