use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swarmlinkd::{Config, Node};

#[derive(Parser, Debug)]
#[command(name = "swarmlinkd")]
#[command(about = "Peer-to-peer content publishing node", version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SWARMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, env = "SWARMLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Create a default configuration and exit
    #[arg(long)]
    init: bool,

    /// Log level filter, overrides the configuration
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node until interrupted
    Run,
    /// Print a freshly generated identity
    Identity,
    /// List stored content
    List {
        /// Print full records instead of identifiers
        #[arg(long)]
        detailed: bool,
    },
    /// Resolve an address to its current infohash
    ///
    /// Looks the address up in this process's in-memory DHT only, so it
    /// finds nothing unless the record was published in the same process.
    Resolve { address: String },
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let config = Config::create_default(args.config, args.data_dir)?;
        println!("Configuration written to {}", config.config_path().display());
        return Ok(());
    }

    let config = Config::load(args.config, args.data_dir)?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, config.logging.json);

    info!("Starting {}", config.node.name);
    let mut node = Node::new(config).await.context("Failed to start node")?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => node.run().await?,
        Command::Identity => {
            let identity = node.manager().create_identity();
            println!("{}", serde_json::to_string_pretty(&identity)?);
            node.shutdown().await;
        }
        Command::List { detailed } => {
            let listing = node.manager().list_all(detailed).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
            node.shutdown().await;
        }
        Command::Resolve { address } => {
            let resolved = node.manager().resolve(&address).await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
            node.shutdown().await;
        }
    }

    Ok(())
}
